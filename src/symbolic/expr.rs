use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::flags::UpdateFlags;
use crate::symbolic::operands::Functor;
use crate::symbolic::{
    BinaryOp, DifferentialOperator, GeometricQuantity, Signature, SpaceOperand, SpaceRole, UnaryOp, ValueKind,
};

#[derive(Clone)]
pub(crate) enum Operand {
    Functor(Functor),
    Space(SpaceOperand),
    Geometry(GeometricQuantity),
    Zero,
    /// The perturbation direction of the residual argument with the given index.
    Direction(usize),
}

pub(crate) enum Node {
    Leaf(Operand),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
}

/// A node of a symbolic expression tree.
///
/// Expressions are immutable and cheap to clone; subtrees are shared.
#[derive(Clone)]
pub struct Expr {
    node: Arc<Node>,
    signature: Signature,
    flags: UpdateFlags,
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("expression", &self.as_ascii(&SymbolicDecorations::default()))
            .field("signature", &self.signature)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Expr {
    pub(crate) fn new(node: Node, signature: Signature, flags: UpdateFlags) -> Self {
        Self {
            node: Arc::new(node),
            signature,
            flags,
        }
    }

    pub(crate) fn functor(functor: Functor) -> Self {
        let signature = functor.signature();
        let flags = functor.update_flags();
        Self::new(Node::Leaf(Operand::Functor(functor)), signature, flags)
    }

    pub(crate) fn space(operand: SpaceOperand) -> Self {
        let signature = operand.signature();
        let flags = operand.update_flags();
        Self::new(Node::Leaf(Operand::Space(operand)), signature, flags)
    }

    pub(crate) fn geometry(quantity: GeometricQuantity, dim: usize) -> Self {
        Self::new(
            Node::Leaf(Operand::Geometry(quantity)),
            quantity.signature(dim),
            quantity.update_flags(),
        )
    }

    pub(crate) fn zero(signature: Signature) -> Self {
        Self::new(Node::Leaf(Operand::Zero), signature, UpdateFlags::DEFAULT)
    }

    pub(crate) fn direction(index: usize, signature: Signature) -> Self {
        Self::new(Node::Leaf(Operand::Direction(index)), signature, UpdateFlags::DEFAULT)
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn rank(&self) -> usize {
        self.signature.rank()
    }

    pub fn dim(&self) -> usize {
        self.signature.dim()
    }

    pub fn value_kind(&self) -> ValueKind {
        self.signature.kind()
    }

    /// The union of the update flags of all operands in the tree.
    pub fn update_flags(&self) -> UpdateFlags {
        self.flags
    }

    pub(crate) fn is_zero(&self) -> bool {
        matches!(&*self.node, Node::Leaf(Operand::Zero))
    }

    /// The role of the expression if it is a bare finite element field operand.
    pub fn leading_role(&self) -> Option<SpaceRole> {
        match &*self.node {
            Node::Leaf(Operand::Space(operand)) => Some(operand.role()),
            _ => None,
        }
    }

    /// The operand if the expression is a bare finite element field operand.
    pub fn as_space_operand(&self) -> Option<&SpaceOperand> {
        match &*self.node {
            Node::Leaf(Operand::Space(operand)) => Some(operand),
            _ => None,
        }
    }

    pub(crate) fn any_operand(&self, predicate: &impl Fn(&Operand) -> bool) -> bool {
        match &*self.node {
            Node::Leaf(operand) => predicate(operand),
            Node::Unary(_, child) => child.any_operand(predicate),
            Node::Binary(_, lhs, rhs) => lhs.any_operand(predicate) || rhs.any_operand(predicate),
        }
    }

    pub(crate) fn visit_space_operands<'a>(&'a self, visitor: &mut impl FnMut(&'a SpaceOperand)) {
        match &*self.node {
            Node::Leaf(Operand::Space(operand)) => visitor(operand),
            Node::Leaf(_) => {}
            Node::Unary(_, child) => child.visit_space_operands(visitor),
            Node::Binary(_, lhs, rhs) => {
                lhs.visit_space_operands(visitor);
                rhs.visit_space_operands(visitor);
            }
        }
    }

    fn contains_role(&self, role: SpaceRole) -> bool {
        self.any_operand(&|operand| matches!(operand, Operand::Space(space) if space.role() == role))
    }

    pub fn contains_test_function(&self) -> bool {
        self.contains_role(SpaceRole::TestFunction)
    }

    pub fn contains_trial_solution(&self) -> bool {
        self.contains_role(SpaceRole::TrialSolution)
    }

    pub fn contains_field_solution(&self) -> bool {
        self.any_operand(&|operand| {
            matches!(operand, Operand::Space(space) if matches!(space.role(), SpaceRole::FieldSolution { .. }))
        })
    }

    /// The highest solution index referenced by any field solution operand.
    pub fn max_solution_index(&self) -> Option<usize> {
        let mut max = None;
        self.visit_space_operands(&mut |operand| {
            if let SpaceRole::FieldSolution { solution_index } = operand.role() {
                max = max.max(Some(solution_index));
            }
        });
        max
    }

    /// The distinct operands of the current solution (solution index 0) in order of first
    /// appearance.
    ///
    /// These are the arguments a residual is linearized with respect to.
    pub fn field_arguments(&self) -> Vec<SpaceOperand> {
        let mut arguments: Vec<SpaceOperand> = Vec::new();
        self.visit_space_operands(&mut |operand| {
            let is_current = operand.role() == SpaceRole::FieldSolution { solution_index: 0 };
            if is_current && !arguments.contains(operand) {
                arguments.push(operand.clone());
            }
        });
        arguments
    }
}

fn render_operand(operand: &Operand, decorations: &SymbolicDecorations, format: Format) -> String {
    let naming = decorations.naming(format);
    match operand {
        Operand::Functor(functor) => functor.symbol().get(format).to_string(),
        Operand::Space(space) => {
            let field = space.extractor().symbol().get(format);
            let mut base = match space.role() {
                SpaceRole::TestFunction => decorations.space_symbol(&naming.test_function, field),
                SpaceRole::TrialSolution => decorations.space_symbol(&naming.trial_solution, field),
                SpaceRole::FieldSolution { .. } => decorations.space_symbol(&naming.solution_field, field),
            };
            if let SpaceRole::FieldSolution { solution_index } = space.role() {
                if solution_index > 0 {
                    match format {
                        Format::Ascii => base.push_str(&format!("(t-{solution_index})")),
                        Format::Latex => base.push_str(&format!("^{{(t-{solution_index})}}")),
                    }
                }
            }
            let names = &naming.differential_operators;
            let operator = match space.operator() {
                DifferentialOperator::Value => &names.value,
                DifferentialOperator::Gradient => &names.gradient,
                DifferentialOperator::SymmetricGradient => &names.symmetric_gradient,
                DifferentialOperator::Divergence => &names.divergence,
                DifferentialOperator::Hessian => &names.hessian,
                DifferentialOperator::Laplacian => &names.laplacian,
                DifferentialOperator::ThirdDerivative => &names.third_derivative,
            };
            decorations.decorate_with_operator(format, operator, &base)
        }
        Operand::Geometry(quantity) => match quantity {
            GeometricQuantity::Position => naming.geometry.position.clone(),
            GeometricQuantity::Normal => naming.geometry.normal.clone(),
            GeometricQuantity::Jacobian => naming.geometry.jacobian.clone(),
        },
        Operand::Zero => String::from("0"),
        Operand::Direction(index) => match format {
            Format::Ascii => format!("h_{index}"),
            Format::Latex => format!("\\mathbf{{h}}_{{{index}}}"),
        },
    }
}

fn render_unary(op: UnaryOp, child: &str, decorations: &SymbolicDecorations, format: Format) -> String {
    let names = &decorations.naming(format).unary_operators;
    let name = match op {
        UnaryOp::Negate => return format!("{}{child}", names.negate),
        UnaryOp::Transpose => &names.transpose,
        UnaryOp::Invert => &names.inverse,
        UnaryOp::Determinant => &names.determinant,
        UnaryOp::Symmetrize => &names.symmetrize,
        UnaryOp::Trace => &names.trace,
        UnaryOp::Norm => &names.norm,
        UnaryOp::Sqrt => &names.sqrt,
        UnaryOp::Exp => &names.exp,
        UnaryOp::Log => &names.log,
        UnaryOp::Sin => &names.sin,
        UnaryOp::Cos => &names.cos,
    };
    match (format, op) {
        (Format::Latex, UnaryOp::Transpose | UnaryOp::Invert) => {
            format!("{}{name}", decorations.bracket(format, child))
        }
        (Format::Latex, UnaryOp::Sqrt) => format!("{name}{{{child}}}"),
        (Format::Latex, UnaryOp::Norm) => format!("\\left{name}{child}\\right{name}"),
        _ => decorations.decorate_with_operator(format, name, child),
    }
}

fn render_binary(
    op: &BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    decorations: &SymbolicDecorations,
    format: Format,
) -> String {
    let names = &decorations.naming(format).binary_operators;
    let a = lhs.render(decorations, format);
    let b = rhs.render(decorations, format);
    let infix = |symbol: &str| decorations.bracket(format, &format!("{a} {symbol} {b}"));
    match op {
        BinaryOp::Add => infix(&names.add),
        BinaryOp::Subtract => infix(&names.subtract),
        BinaryOp::Multiply => infix(&names.multiply),
        BinaryOp::OuterProduct => infix(&names.outer_product),
        BinaryOp::Divide => match format {
            Format::Ascii => infix(&names.divide),
            Format::Latex => format!("{}{{{a}}}{{{b}}}", names.divide),
        },
        BinaryOp::Contract(pairs) => {
            if BinaryOp::is_trailing_contraction(pairs, lhs.rank()) {
                infix(&decorations.naming(format).contraction(pairs.len()))
            } else {
                let pairs_string = pairs
                    .iter()
                    .map(|(i, j)| format!("({i},{j})"))
                    .collect::<Vec<_>>()
                    .join("");
                match format {
                    Format::Ascii => format!("contract<{pairs_string}>({a}, {b})"),
                    Format::Latex => format!("\\text{{contract}}_{{{pairs_string}}}\\left({a}, {b}\\right)"),
                }
            }
        }
    }
}

impl Render for Expr {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        match &*self.node {
            Node::Leaf(operand) => render_operand(operand, decorations, format),
            Node::Unary(op, child) => render_unary(*op, &child.render(decorations, format), decorations, format),
            Node::Binary(op, lhs, rhs) => render_binary(op, lhs, rhs, decorations, format),
        }
    }
}
