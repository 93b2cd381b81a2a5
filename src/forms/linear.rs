use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::flags::UpdateFlags;
use crate::forms::{validate_functor, validate_test_operand, FormError};
use crate::integral::Integrand;
use crate::symbolic::{constant_scalar_in, constant_tensor_in, Expr, Signature};
use crate::tensor::Tensor;

/// `∫ test · functor`, contracted over all indices.
#[derive(Debug, Clone)]
pub struct LinearForm {
    test: Expr,
    functor: Expr,
}

/// Build a linear form.
///
/// `test` must contain a test function and no trial solution; `functor` must contain neither.
/// The two operands must have the same rank and dimension.
pub fn linear_form(test: &Expr, functor: &Expr) -> Result<LinearForm, FormError> {
    validate_test_operand(test)?;
    validate_functor(functor, "functor")?;
    if test.rank() != functor.rank() || test.dim() != functor.dim() {
        return Err(FormError::IncompatibleShapes {
            form: "linear form",
            test: test.signature(),
            functor: functor.signature(),
            trial: None,
        });
    }
    Ok(LinearForm {
        test: test.clone(),
        functor: functor.clone(),
    })
}

/// A linear form with a constant scalar functor.
pub fn linear_form_scalar(test: &Expr, value: f64) -> Result<LinearForm, FormError> {
    linear_form(test, &constant_scalar_in(value, test.dim()))
}

/// A linear form with a constant tensor functor.
pub fn linear_form_tensor(test: &Expr, value: Tensor<f64>) -> Result<LinearForm, FormError> {
    let signature = Signature::tensor(value.rank(), test.dim());
    if value.rank() > 0 && value.dim() != test.dim() {
        return Err(FormError::IncompatibleShapes {
            form: "linear form",
            test: test.signature(),
            functor: Signature::tensor(value.rank(), value.dim()),
            trial: None,
        });
    }
    linear_form(test, &constant_tensor_in(value, signature))
}

impl LinearForm {
    pub fn test(&self) -> &Expr {
        &self.test
    }

    pub fn functor(&self) -> &Expr {
        &self.functor
    }
}

impl Render for LinearForm {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let test = self.test.render(decorations, format);
        let functor = self.functor.render(decorations, format);
        match format {
            Format::Ascii => format!("({test}, {functor})"),
            Format::Latex => {
                let symbol = decorations.naming(format).contraction(self.test.rank());
                decorations.bracket(format, &format!("{test} {symbol} {functor}"))
            }
        }
    }
}

impl Integrand for LinearForm {
    fn integrand_update_flags(&self) -> UpdateFlags {
        self.test.update_flags() | self.functor.update_flags()
    }
}
