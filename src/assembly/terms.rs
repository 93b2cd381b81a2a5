use std::ops::{Add, Neg, Sub};

use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::flags::UpdateFlags;
use crate::forms::{BilinearForm, LinearForm, ResidualForm};
use crate::integral::{IntegrationDomain, SymbolicIntegral};
use crate::symbolic::Expr;

/// A symbolic integral of one of the form kinds the assembler understands.
#[derive(Debug, Clone)]
pub enum AssemblyTerm {
    Linear(SymbolicIntegral<LinearForm>),
    Bilinear(SymbolicIntegral<BilinearForm>),
    Residual(SymbolicIntegral<ResidualForm>),
}

impl AssemblyTerm {
    pub fn domain(&self) -> &IntegrationDomain {
        match self {
            Self::Linear(integral) => integral.domain(),
            Self::Bilinear(integral) => integral.domain(),
            Self::Residual(integral) => integral.domain(),
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Self::Linear(integral) => integral.sign(),
            Self::Bilinear(integral) => integral.sign(),
            Self::Residual(integral) => integral.sign(),
        }
    }

    pub fn is_negated(&self) -> bool {
        self.sign() < 0.0
    }

    pub fn update_flags(&self) -> UpdateFlags {
        match self {
            Self::Linear(integral) => integral.update_flags(),
            Self::Bilinear(integral) => integral.update_flags(),
            Self::Residual(integral) => integral.update_flags(),
        }
    }

    /// The test operand of the integrated form.
    pub fn test(&self) -> &Expr {
        match self {
            Self::Linear(integral) => integral.integrand().test(),
            Self::Bilinear(integral) => integral.integrand().test(),
            Self::Residual(integral) => integral.integrand().test(),
        }
    }

    /// Every expression of the integrated form that is evaluated during assembly.
    pub(crate) fn expressions(&self) -> Vec<&Expr> {
        match self {
            Self::Linear(integral) => {
                let form = integral.integrand();
                vec![form.test(), form.functor()]
            }
            Self::Bilinear(integral) => {
                let form = integral.integrand();
                vec![form.test(), form.functor(), form.trial()]
            }
            Self::Residual(integral) => {
                let form = integral.integrand();
                let mut expressions = vec![form.test()];
                expressions.extend(form.residual().expression());
                expressions
            }
        }
    }

    /// Whether the term contributes to the system matrix.
    pub fn contributes_to_matrix(&self) -> bool {
        !matches!(self, Self::Linear(_))
    }

    /// Whether the term contributes to the right-hand side.
    pub fn contributes_to_rhs(&self) -> bool {
        !matches!(self, Self::Bilinear(_))
    }
}

impl Neg for AssemblyTerm {
    type Output = Self;

    fn neg(self) -> Self::Output {
        match self {
            Self::Linear(integral) => Self::Linear(-integral),
            Self::Bilinear(integral) => Self::Bilinear(-integral),
            Self::Residual(integral) => Self::Residual(-integral),
        }
    }
}

impl Render for AssemblyTerm {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        match self {
            Self::Linear(integral) => integral.render(decorations, format),
            Self::Bilinear(integral) => integral.render(decorations, format),
            Self::Residual(integral) => integral.render(decorations, format),
        }
    }
}

impl From<SymbolicIntegral<LinearForm>> for AssemblyTerm {
    fn from(integral: SymbolicIntegral<LinearForm>) -> Self {
        Self::Linear(integral)
    }
}

impl From<SymbolicIntegral<BilinearForm>> for AssemblyTerm {
    fn from(integral: SymbolicIntegral<BilinearForm>) -> Self {
        Self::Bilinear(integral)
    }
}

impl From<SymbolicIntegral<ResidualForm>> for AssemblyTerm {
    fn from(integral: SymbolicIntegral<ResidualForm>) -> Self {
        Self::Residual(integral)
    }
}

/// Anything that can be added to an assembler: single integrals and sums of integrals.
pub trait IntoAssemblyTerms {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm>;
}

impl IntoAssemblyTerms for AssemblyTerm {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        vec![self]
    }
}

impl IntoAssemblyTerms for SymbolicIntegral<LinearForm> {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        vec![self.into()]
    }
}

impl IntoAssemblyTerms for SymbolicIntegral<BilinearForm> {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        vec![self.into()]
    }
}

impl IntoAssemblyTerms for SymbolicIntegral<ResidualForm> {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        vec![self.into()]
    }
}

impl IntoAssemblyTerms for WeakForm {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        self.terms
    }
}

impl IntoAssemblyTerms for Vec<AssemblyTerm> {
    fn into_assembly_terms(self) -> Vec<AssemblyTerm> {
        self
    }
}

/// A sum of signed integrals, `0 = t_1 + t_2 - t_3 + ...`.
///
/// Built with `+` and `-` on symbolic integrals:
/// `let weak_form = bilinear.dv() - source.dv() - traction.da();`
#[derive(Debug, Clone, Default)]
pub struct WeakForm {
    terms: Vec<AssemblyTerm>,
}

impl WeakForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> &[AssemblyTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl Render for WeakForm {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        render_sum(&self.terms, decorations, format)
    }
}

/// `t_1 + t_2 - t_3`, or `0` for an empty sum.
pub(crate) fn render_sum(terms: &[AssemblyTerm], decorations: &SymbolicDecorations, format: Format) -> String {
    let mut rendered = String::new();
    for (index, term) in terms.iter().enumerate() {
        // Negated terms render with a leading sign, which becomes the binary operator
        let magnitude = if term.is_negated() {
            (-term.clone()).render(decorations, format)
        } else {
            term.render(decorations, format)
        };
        match (index, term.is_negated()) {
            (0, false) => rendered.push_str(&magnitude),
            (0, true) => rendered.push_str(&format!("-{magnitude}")),
            (_, false) => rendered.push_str(&format!(" + {magnitude}")),
            (_, true) => rendered.push_str(&format!(" - {magnitude}")),
        }
    }
    if rendered.is_empty() {
        rendered.push('0');
    }
    rendered
}

impl<R: IntoAssemblyTerms> Add<R> for WeakForm {
    type Output = WeakForm;

    fn add(mut self, rhs: R) -> Self::Output {
        self.terms.extend(rhs.into_assembly_terms());
        self
    }
}

impl<R: IntoAssemblyTerms> Sub<R> for WeakForm {
    type Output = WeakForm;

    fn sub(mut self, rhs: R) -> Self::Output {
        self.terms
            .extend(rhs.into_assembly_terms().into_iter().map(Neg::neg));
        self
    }
}

impl Neg for WeakForm {
    type Output = WeakForm;

    fn neg(self) -> Self::Output {
        WeakForm {
            terms: self.terms.into_iter().map(Neg::neg).collect(),
        }
    }
}

macro_rules! impl_weak_form_arithmetic {
    ($form:ty) => {
        impl<R: IntoAssemblyTerms> Add<R> for SymbolicIntegral<$form> {
            type Output = WeakForm;

            fn add(self, rhs: R) -> Self::Output {
                WeakForm {
                    terms: self.into_assembly_terms(),
                } + rhs
            }
        }

        impl<R: IntoAssemblyTerms> Sub<R> for SymbolicIntegral<$form> {
            type Output = WeakForm;

            fn sub(self, rhs: R) -> Self::Output {
                WeakForm {
                    terms: self.into_assembly_terms(),
                } - rhs
            }
        }
    };
}

impl_weak_form_arithmetic!(LinearForm);
impl_weak_form_arithmetic!(BilinearForm);
impl_weak_form_arithmetic!(ResidualForm);
