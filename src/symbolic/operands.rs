use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::eyre;

use crate::decorations::Format;
use crate::flags::UpdateFlags;
use crate::symbolic::{Expr, QuadraturePoint, Signature};
use crate::tensor::Tensor;
use crate::values::FeValuesBase;

/// A pair of ASCII and LaTeX names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    ascii: String,
    latex: String,
}

impl Symbol {
    pub fn new(ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            ascii: ascii.into(),
            latex: latex.into(),
        }
    }

    pub fn ascii(&self) -> &str {
        &self.ascii
    }

    pub fn latex(&self) -> &str {
        &self.latex
    }

    pub fn get(&self, format: Format) -> &str {
        match format {
            Format::Ascii => &self.ascii,
            Format::Latex => &self.latex,
        }
    }
}

/// A process-unique identity of a functor, used as a cache key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctorId(usize);

impl FunctorId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type FunctorFn = dyn Fn(&QuadraturePoint<'_>) -> Tensor<f64> + Send + Sync;

#[derive(Clone)]
pub(crate) enum FunctorDefinition {
    Constant(Tensor<f64>),
    Function(Arc<FunctorFn>),
}

/// A user-supplied quantity evaluated at quadrature points.
#[derive(Clone)]
pub struct Functor {
    id: FunctorId,
    symbol: Symbol,
    signature: Signature,
    flags: UpdateFlags,
    definition: FunctorDefinition,
}

impl Debug for Functor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Functor")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .field("signature", &self.signature)
            .field("flags", &self.flags)
            .field("constant", &self.is_constant())
            .finish()
    }
}

impl Functor {
    pub(crate) fn new(symbol: Symbol, signature: Signature, flags: UpdateFlags, definition: FunctorDefinition) -> Self {
        Self {
            id: FunctorId::next(),
            symbol,
            signature,
            flags,
            definition,
        }
    }

    pub fn id(&self) -> FunctorId {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn update_flags(&self) -> UpdateFlags {
        self.flags
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.definition, FunctorDefinition::Constant(_))
    }

    pub(crate) fn evaluate(&self, point: &QuadraturePoint<'_>) -> eyre::Result<Tensor<f64>> {
        let value = match &self.definition {
            FunctorDefinition::Constant(value) => value.clone(),
            FunctorDefinition::Function(function) => function(point),
        };
        let rank_ok = value.rank() == self.signature.rank();
        let dim_ok = value.rank() == 0 || value.dim() == self.signature.dim();
        if rank_ok && dim_ok {
            Ok(value)
        } else {
            Err(eyre!(
                "functor {} returned a tensor of rank {} and dim {}, but was declared as {}",
                self.symbol.ascii(),
                value.rank(),
                value.dim(),
                self.signature
            ))
        }
    }

    fn into_expr(self) -> Expr {
        Expr::functor(self)
    }
}

/// Declaration of a scalar-valued functor.
#[derive(Debug, Clone)]
pub struct ScalarFunctor {
    symbol: Symbol,
    flags: UpdateFlags,
}

impl ScalarFunctor {
    pub fn new(ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(ascii, latex),
            flags: UpdateFlags::DEFAULT,
        }
    }

    /// Additional quantities the functor reads from the quadrature point, e.g. its position.
    pub fn with_update_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn value<const DIM: usize, F>(&self, function: F) -> Expr
    where
        F: Fn(&QuadraturePoint<'_>) -> f64 + Send + Sync + 'static,
    {
        let definition = FunctorDefinition::Function(Arc::new(move |point: &QuadraturePoint<'_>| {
            Tensor::scalar(function(point))
        }));
        Functor::new(self.symbol.clone(), Signature::scalar(DIM), self.flags, definition).into_expr()
    }
}

/// Declaration of a vector-valued functor in `DIM` dimensions.
#[derive(Debug, Clone)]
pub struct VectorFunctor<const DIM: usize> {
    symbol: Symbol,
    flags: UpdateFlags,
}

impl<const DIM: usize> VectorFunctor<DIM> {
    pub fn new(ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(ascii, latex),
            flags: UpdateFlags::DEFAULT,
        }
    }

    pub fn with_update_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn value<F>(&self, function: F) -> Expr
    where
        F: Fn(&QuadraturePoint<'_>) -> [f64; DIM] + Send + Sync + 'static,
    {
        let definition = FunctorDefinition::Function(Arc::new(move |point: &QuadraturePoint<'_>| {
            Tensor::from_data(1, DIM, function(point).to_vec())
        }));
        Functor::new(self.symbol.clone(), Signature::vector(DIM), self.flags, definition).into_expr()
    }
}

/// Declaration of a tensor-valued functor of rank `RANK` in `DIM` dimensions.
#[derive(Debug, Clone)]
pub struct TensorFunctor<const RANK: usize, const DIM: usize> {
    symbol: Symbol,
    flags: UpdateFlags,
}

impl<const RANK: usize, const DIM: usize> TensorFunctor<RANK, DIM> {
    pub fn new(ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(ascii, latex),
            flags: UpdateFlags::DEFAULT,
        }
    }

    pub fn with_update_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The function must return tensors of rank `RANK` and dimension `DIM`; a mismatch is
    /// reported as an error when the functor is evaluated.
    pub fn value<F>(&self, function: F) -> Expr
    where
        F: Fn(&QuadraturePoint<'_>) -> Tensor<f64> + Send + Sync + 'static,
    {
        let definition = FunctorDefinition::Function(Arc::new(function));
        Functor::new(self.symbol.clone(), Signature::tensor(RANK, DIM), self.flags, definition).into_expr()
    }
}

/// Declaration of a symmetric tensor-valued functor of even rank `RANK` in `DIM` dimensions.
#[derive(Debug, Clone)]
pub struct SymmetricTensorFunctor<const RANK: usize, const DIM: usize> {
    symbol: Symbol,
    flags: UpdateFlags,
}

impl<const RANK: usize, const DIM: usize> SymmetricTensorFunctor<RANK, DIM> {
    pub fn new(ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            symbol: Symbol::new(ascii, latex),
            flags: UpdateFlags::DEFAULT,
        }
    }

    pub fn with_update_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn value<F>(&self, function: F) -> Expr
    where
        F: Fn(&QuadraturePoint<'_>) -> Tensor<f64> + Send + Sync + 'static,
    {
        let definition = FunctorDefinition::Function(Arc::new(function));
        let signature = Signature::symmetric_tensor(RANK, DIM);
        Functor::new(self.symbol.clone(), signature, self.flags, definition).into_expr()
    }
}

fn constant(value: Tensor<f64>, signature: Signature) -> Expr {
    let name = value.to_string();
    let symbol = Symbol::new(name.clone(), name);
    Functor::new(symbol, signature, UpdateFlags::DEFAULT, FunctorDefinition::Constant(value)).into_expr()
}

/// A constant scalar in a `DIM`-dimensional problem.
pub fn constant_scalar<const DIM: usize>(value: f64) -> Expr {
    constant(Tensor::scalar(value), Signature::scalar(DIM))
}

pub fn constant_vector<const DIM: usize>(value: [f64; DIM]) -> Expr {
    constant(Tensor::from_data(1, DIM, value.to_vec()), Signature::vector(DIM))
}

/// A constant tensor. Its rank is taken from `value`, whose dimension must be `DIM`.
pub fn constant_tensor<const DIM: usize>(value: Tensor<f64>) -> Expr {
    assert!(
        value.rank() == 0 || value.dim() == DIM,
        "Constant tensor has dimension {}, expected {DIM}",
        value.dim()
    );
    let signature = Signature::tensor(value.rank(), DIM);
    constant(value, signature)
}

/// A constant tensor tagged as symmetric. Its rank must be even and at least 2.
pub fn constant_symmetric_tensor<const DIM: usize>(value: Tensor<f64>) -> Expr {
    assert_eq!(value.dim(), DIM, "Constant tensor has dimension {}, expected {DIM}", value.dim());
    let signature = Signature::symmetric_tensor(value.rank(), DIM);
    constant(value, signature)
}

pub(crate) fn constant_scalar_in(value: f64, dim: usize) -> Expr {
    constant(Tensor::scalar(value), Signature::scalar(dim))
}

pub(crate) fn constant_tensor_in(value: Tensor<f64>, signature: Signature) -> Expr {
    constant(value, signature)
}

/// The role a finite element field plays in a form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SpaceRole {
    TestFunction,
    TrialSolution,
    /// A discrete solution. Index 0 is the current solution, higher indices refer to
    /// additional solution vectors such as previous time steps.
    FieldSolution { solution_index: usize },
}

/// A differential operator applied to a finite element field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DifferentialOperator {
    Value,
    Gradient,
    SymmetricGradient,
    Divergence,
    Hessian,
    Laplacian,
    ThirdDerivative,
}

impl DifferentialOperator {
    /// The order of shape function derivatives the operator reads.
    pub fn derivative_order(&self) -> usize {
        match self {
            Self::Value => 0,
            Self::Gradient | Self::SymmetricGradient | Self::Divergence => 1,
            Self::Hessian | Self::Laplacian => 2,
            Self::ThirdDerivative => 3,
        }
    }

    pub fn update_flags(&self) -> UpdateFlags {
        UpdateFlags::for_derivative_order(self.derivative_order())
    }
}

/// Selects one component of a (possibly vector-valued) finite element field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScalarExtractor {
    component: usize,
    symbol: Symbol,
}

impl ScalarExtractor {
    pub fn new(component: usize, ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            component,
            symbol: Symbol::new(ascii, latex),
        }
    }

    pub fn component(&self) -> usize {
        self.component
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

/// Selects `DIM` consecutive components of a finite element field, starting at `first_component`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorExtractor {
    first_component: usize,
    symbol: Symbol,
}

impl VectorExtractor {
    pub fn new(first_component: usize, ascii: impl Into<String>, latex: impl Into<String>) -> Self {
        Self {
            first_component,
            symbol: Symbol::new(ascii, latex),
        }
    }

    pub fn first_component(&self) -> usize {
        self.first_component
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extractor {
    Scalar(ScalarExtractor),
    Vector(VectorExtractor),
}

impl Extractor {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Scalar(extractor) => extractor.symbol(),
            Self::Vector(extractor) => extractor.symbol(),
        }
    }
}

/// A differential operator applied to an extracted view of a test function, trial solution or
/// field solution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpaceOperand {
    role: SpaceRole,
    extractor: Extractor,
    operator: DifferentialOperator,
    dim: usize,
}

impl SpaceOperand {
    pub fn role(&self) -> SpaceRole {
        self.role
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn operator(&self) -> DifferentialOperator {
        self.operator
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn signature(&self) -> Signature {
        use DifferentialOperator::*;
        let d = self.dim;
        match (&self.extractor, self.operator) {
            (Extractor::Scalar(_), Value | Laplacian) => Signature::scalar(d),
            (Extractor::Scalar(_), Gradient) => Signature::vector(d),
            (Extractor::Scalar(_), Hessian) => Signature::symmetric_tensor(2, d),
            (Extractor::Scalar(_), ThirdDerivative) => Signature::tensor(3, d),
            (Extractor::Scalar(_), SymmetricGradient | Divergence) => {
                unreachable!("{:?} is not defined for scalar-valued fields", self.operator)
            }
            (Extractor::Vector(_), Value) => Signature::vector(d),
            (Extractor::Vector(_), Gradient) => Signature::tensor(2, d),
            (Extractor::Vector(_), SymmetricGradient) => Signature::symmetric_tensor(2, d),
            (Extractor::Vector(_), Divergence) => Signature::scalar(d),
            (Extractor::Vector(_), Laplacian) => Signature::vector(d),
            (Extractor::Vector(_), Hessian) => Signature::tensor(3, d),
            (Extractor::Vector(_), ThirdDerivative) => Signature::tensor(4, d),
        }
    }

    pub fn update_flags(&self) -> UpdateFlags {
        self.operator.update_flags()
    }

    /// The same operand in a different role, e.g. the trial counterpart of a field solution.
    pub fn with_role(&self, role: SpaceRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }

    /// The operator applied to the shape function of local dof `dof` at quadrature point `q`.
    pub(crate) fn evaluate_shape(&self, values: &dyn FeValuesBase, dof: usize, q: usize) -> Tensor<f64> {
        use DifferentialOperator::*;
        let d = self.dim;
        let signature = self.signature();
        let shape = values.shape_derivative(dof, self.operator.derivative_order(), q);
        let derivative = shape.derivative;
        let factor = shape.factor;

        match &self.extractor {
            Extractor::Scalar(extractor) => {
                if shape.component != extractor.component() {
                    return Tensor::zeros(signature.rank(), d);
                }
                let value = match self.operator {
                    Laplacian => Tensor::scalar(derivative.trace()),
                    _ => derivative.clone(),
                };
                value.scaled(factor)
            }
            Extractor::Vector(extractor) => {
                let first = extractor.first_component();
                if shape.component < first || shape.component >= first + d {
                    return Tensor::zeros(signature.rank(), d);
                }
                let k = shape.component - first;
                let value = match self.operator {
                    Divergence => Tensor::scalar(*derivative.get(&[k])),
                    SymmetricGradient => {
                        let gradient = Tensor::from_fn(2, d, |idx| {
                            if idx[0] == k {
                                *derivative.get(&idx[1..])
                            } else {
                                0.0
                            }
                        });
                        gradient.symmetrize()
                    }
                    Laplacian => {
                        let laplacian = derivative.trace();
                        Tensor::from_fn(1, d, |idx| if idx[0] == k { laplacian } else { 0.0 })
                    }
                    Value | Gradient | Hessian | ThirdDerivative => {
                        // Component k of the field carries the scalar shape derivative,
                        // all other components vanish
                        Tensor::from_fn(derivative.rank() + 1, d, |idx| {
                            if idx[0] == k {
                                if derivative.rank() == 0 {
                                    derivative.scalar_value()
                                } else {
                                    *derivative.get(&idx[1..])
                                }
                            } else {
                                0.0
                            }
                        })
                    }
                };
                value.scaled(factor)
            }
        }
    }

    pub(crate) fn into_expr(self) -> Expr {
        Expr::space(self)
    }
}

/// Differential operators available on a scalar view of a finite element field.
#[derive(Debug, Clone)]
pub struct ScalarView {
    role: SpaceRole,
    extractor: ScalarExtractor,
    dim: usize,
}

impl ScalarView {
    fn operand(&self, operator: DifferentialOperator) -> Expr {
        SpaceOperand {
            role: self.role,
            extractor: Extractor::Scalar(self.extractor.clone()),
            operator,
            dim: self.dim,
        }
        .into_expr()
    }

    pub fn value(&self) -> Expr {
        self.operand(DifferentialOperator::Value)
    }

    pub fn gradient(&self) -> Expr {
        self.operand(DifferentialOperator::Gradient)
    }

    pub fn hessian(&self) -> Expr {
        self.operand(DifferentialOperator::Hessian)
    }

    pub fn laplacian(&self) -> Expr {
        self.operand(DifferentialOperator::Laplacian)
    }

    pub fn third_derivative(&self) -> Expr {
        self.operand(DifferentialOperator::ThirdDerivative)
    }
}

/// Differential operators available on a vector view of a finite element field.
#[derive(Debug, Clone)]
pub struct VectorView {
    role: SpaceRole,
    extractor: VectorExtractor,
    dim: usize,
}

impl VectorView {
    fn operand(&self, operator: DifferentialOperator) -> Expr {
        SpaceOperand {
            role: self.role,
            extractor: Extractor::Vector(self.extractor.clone()),
            operator,
            dim: self.dim,
        }
        .into_expr()
    }

    pub fn value(&self) -> Expr {
        self.operand(DifferentialOperator::Value)
    }

    pub fn gradient(&self) -> Expr {
        self.operand(DifferentialOperator::Gradient)
    }

    pub fn symmetric_gradient(&self) -> Expr {
        self.operand(DifferentialOperator::SymmetricGradient)
    }

    pub fn divergence(&self) -> Expr {
        self.operand(DifferentialOperator::Divergence)
    }

    pub fn hessian(&self) -> Expr {
        self.operand(DifferentialOperator::Hessian)
    }

    pub fn third_derivative(&self) -> Expr {
        self.operand(DifferentialOperator::ThirdDerivative)
    }
}

macro_rules! space_declaration {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub struct $name<const DIM: usize> {
            role: SpaceRole,
        }

        impl<const DIM: usize> $name<DIM> {
            pub fn role(&self) -> SpaceRole {
                self.role
            }

            pub fn scalar(&self, extractor: &ScalarExtractor) -> ScalarView {
                ScalarView {
                    role: self.role,
                    extractor: extractor.clone(),
                    dim: DIM,
                }
            }

            pub fn vector(&self, extractor: &VectorExtractor) -> VectorView {
                VectorView {
                    role: self.role,
                    extractor: extractor.clone(),
                    dim: DIM,
                }
            }
        }
    };
}

space_declaration!(
    /// The test function of a `DIM`-dimensional problem.
    TestFunction
);
space_declaration!(
    /// The trial solution (the unknown increment) of a `DIM`-dimensional problem.
    TrialSolution
);
space_declaration!(
    /// A discrete solution field of a `DIM`-dimensional problem.
    FieldSolution
);

impl<const DIM: usize> TestFunction<DIM> {
    pub fn new() -> Self {
        Self {
            role: SpaceRole::TestFunction,
        }
    }
}

impl<const DIM: usize> Default for TestFunction<DIM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DIM: usize> TrialSolution<DIM> {
    pub fn new() -> Self {
        Self {
            role: SpaceRole::TrialSolution,
        }
    }
}

impl<const DIM: usize> Default for TrialSolution<DIM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DIM: usize> FieldSolution<DIM> {
    /// The current solution.
    pub fn new() -> Self {
        Self::at_index(0)
    }

    /// The solution stored at `solution_index` of the solution storage.
    pub fn at_index(solution_index: usize) -> Self {
        Self {
            role: SpaceRole::FieldSolution { solution_index },
        }
    }
}

impl<const DIM: usize> Default for FieldSolution<DIM> {
    fn default() -> Self {
        Self::new()
    }
}

/// Geometric quantities of the current cell or face.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GeometricQuantity {
    Position,
    /// The outward unit normal. Only available on faces.
    Normal,
    Jacobian,
}

impl GeometricQuantity {
    pub fn signature(&self, dim: usize) -> Signature {
        match self {
            Self::Position | Self::Normal => Signature::vector(dim),
            Self::Jacobian => Signature::tensor(2, dim),
        }
    }

    pub fn update_flags(&self) -> UpdateFlags {
        match self {
            Self::Position => UpdateFlags::QUADRATURE_POINTS,
            Self::Normal => UpdateFlags::NORMAL_VECTORS,
            Self::Jacobian => UpdateFlags::JACOBIANS,
        }
    }
}

/// The outward unit normal on a boundary or interface face.
#[derive(Debug, Copy, Clone, Default)]
pub struct Normal<const DIM: usize>;

impl<const DIM: usize> Normal<DIM> {
    pub fn new() -> Self {
        Self
    }

    pub fn value(&self) -> Expr {
        Expr::geometry(GeometricQuantity::Normal, DIM)
    }
}

/// The physical position of the quadrature point.
#[derive(Debug, Copy, Clone, Default)]
pub struct Position<const DIM: usize>;

impl<const DIM: usize> Position<DIM> {
    pub fn new() -> Self {
        Self
    }

    pub fn value(&self) -> Expr {
        Expr::geometry(GeometricQuantity::Position, DIM)
    }
}

/// The Jacobian of the reference-to-physical cell map.
#[derive(Debug, Copy, Clone, Default)]
pub struct Jacobian<const DIM: usize>;

impl<const DIM: usize> Jacobian<DIM> {
    pub fn new() -> Self {
        Self
    }

    pub fn value(&self) -> Expr {
        Expr::geometry(GeometricQuantity::Jacobian, DIM)
    }
}
