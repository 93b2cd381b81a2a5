use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::flags::UpdateFlags;
use crate::forms::{validate_functor, validate_test_operand, FormError};
use crate::integral::Integrand;
use crate::symbolic::Expr;

/// `∫ test[I] functor[I, J] trial[J]`.
///
/// A scalar functor scales the full contraction of `test` and `trial` instead.
#[derive(Debug, Clone)]
pub struct BilinearForm {
    test: Expr,
    functor: Expr,
    trial: Expr,
    symmetric: bool,
}

/// Build a bilinear form.
///
/// `test` must contain a test function and no trial solution, `trial` a trial solution and no
/// test function, and `functor` neither. The functor must either be a scalar (with `test` and
/// `trial` of equal rank) or have rank `rank(test) + rank(trial)`.
pub fn bilinear_form(test: &Expr, functor: &Expr, trial: &Expr) -> Result<BilinearForm, FormError> {
    validate_test_operand(test)?;
    validate_functor(functor, "functor")?;
    if !trial.contains_trial_solution() {
        return Err(FormError::MissingTrialSolution);
    }
    if trial.contains_test_function() {
        return Err(FormError::UnexpectedTestFunction {
            position: "trial operand",
        });
    }

    let dims_match = test.dim() == functor.dim() && test.dim() == trial.dim();
    let ranks_match = if functor.rank() == 0 {
        test.rank() == trial.rank()
    } else {
        functor.rank() == test.rank() + trial.rank()
    };
    if !dims_match || !ranks_match {
        return Err(FormError::IncompatibleShapes {
            form: "bilinear form",
            test: test.signature(),
            functor: functor.signature(),
            trial: Some(trial.signature()),
        });
    }

    Ok(BilinearForm {
        test: test.clone(),
        functor: functor.clone(),
        trial: trial.clone(),
        symmetric: false,
    })
}

impl BilinearForm {
    /// Declare the local contribution symmetric.
    ///
    /// Only entries `(i, j)` with `j >= i` are computed and mirrored to `(j, i)`.
    pub fn symmetrize(self) -> Self {
        Self {
            symmetric: true,
            ..self
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn test(&self) -> &Expr {
        &self.test
    }

    pub fn functor(&self) -> &Expr {
        &self.functor
    }

    pub fn trial(&self) -> &Expr {
        &self.trial
    }
}

impl Render for BilinearForm {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let test = self.test.render(decorations, format);
        let functor = self.functor.render(decorations, format);
        let trial = self.trial.render(decorations, format);
        match format {
            Format::Ascii => format!("({test}, {functor}, {trial})"),
            Format::Latex => {
                let naming = decorations.naming(format);
                let (left, right) = if self.functor.rank() == 0 {
                    (naming.contraction(0), naming.contraction(self.trial.rank()))
                } else {
                    (naming.contraction(self.test.rank()), naming.contraction(self.trial.rank()))
                };
                decorations.bracket(format, &format!("{test} {left} {functor} {right} {trial}"))
            }
        }
    }
}

impl Integrand for BilinearForm {
    fn integrand_update_flags(&self) -> UpdateFlags {
        self.test.update_flags() | self.functor.update_flags() | self.trial.update_flags()
    }
}
