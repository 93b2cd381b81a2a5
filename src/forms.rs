//! Linear, bilinear and residual forms.
//!
//! Forms combine a test-function expression with a functor (and, for bilinear forms, a trial
//! solution expression). Their roles and shapes are validated when they are built.
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::symbolic::{Expr, Signature, SymbolicError};

mod bilinear;
mod linear;
mod residual;

pub use bilinear::{bilinear_form, BilinearForm};
pub use linear::{linear_form, linear_form_scalar, linear_form_tensor, LinearForm};
pub use residual::{residual_form, ResidualForm, ResidualFunction, ResidualFunctor};

/// Errors raised while building forms.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FormError {
    /// The test operand of a form does not contain a test function.
    MissingTestFunction,
    /// The trial operand of a bilinear form does not contain a trial solution.
    MissingTrialSolution,
    /// A test function appears where it is not allowed.
    UnexpectedTestFunction { position: &'static str },
    /// A trial solution appears where it is not allowed.
    UnexpectedTrialSolution { position: &'static str },
    /// The shapes of the operands cannot be combined into a scalar.
    IncompatibleShapes {
        form: &'static str,
        test: Signature,
        functor: Signature,
        trial: Option<Signature>,
    },
    /// A residual argument is not a bare operand of the current field solution.
    InvalidResidualArgument { index: usize },
    /// Symbolic differentiation needs the residual as an expression.
    SymbolicBackendRequiresExpression,
    Symbolic(SymbolicError),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTestFunction => write!(f, "the test operand does not contain a test function"),
            Self::MissingTrialSolution => write!(f, "the trial operand does not contain a trial solution"),
            Self::UnexpectedTestFunction { position } => {
                write!(f, "the {position} must not contain a test function")
            }
            Self::UnexpectedTrialSolution { position } => {
                write!(f, "the {position} must not contain a trial solution")
            }
            Self::IncompatibleShapes {
                form,
                test,
                functor,
                trial,
            } => {
                write!(f, "incompatible shapes for {form}: test {test}, functor {functor}")?;
                if let Some(trial) = trial {
                    write!(f, ", trial {trial}")?;
                }
                Ok(())
            }
            Self::InvalidResidualArgument { index } => write!(
                f,
                "residual argument {index} is not a bare operand of the current field solution"
            ),
            Self::SymbolicBackendRequiresExpression => write!(
                f,
                "symbolic differentiation requires a residual defined by an expression"
            ),
            Self::Symbolic(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FormError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Symbolic(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SymbolicError> for FormError {
    fn from(err: SymbolicError) -> Self {
        Self::Symbolic(err)
    }
}

/// Check that `test` contains a test function and no trial solution.
pub(crate) fn validate_test_operand(test: &Expr) -> Result<(), FormError> {
    if !test.contains_test_function() {
        return Err(FormError::MissingTestFunction);
    }
    if test.contains_trial_solution() {
        return Err(FormError::UnexpectedTrialSolution { position: "test operand" });
    }
    Ok(())
}

/// Check that a functor contains neither test functions nor trial solutions.
pub(crate) fn validate_functor(functor: &Expr, position: &'static str) -> Result<(), FormError> {
    if functor.contains_test_function() {
        return Err(FormError::UnexpectedTestFunction { position });
    }
    if functor.contains_trial_solution() {
        return Err(FormError::UnexpectedTrialSolution { position });
    }
    Ok(())
}
