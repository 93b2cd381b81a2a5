//! Naming conventions used when rendering symbolic objects as ASCII or LaTeX.
//!
//! Decorations are plain data and can be (de)serialized, so that a customized naming
//! scheme can be stored alongside other configuration.
use serde::{Deserialize, Serialize};

/// The output format of a rendering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    Ascii,
    Latex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferentialOperatorNames {
    pub value: String,
    pub gradient: String,
    pub symmetric_gradient: String,
    pub divergence: String,
    pub hessian: String,
    pub laplacian: String,
    pub third_derivative: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnaryOperatorNames {
    pub negate: String,
    pub transpose: String,
    pub inverse: String,
    pub determinant: String,
    pub symmetrize: String,
    pub trace: String,
    pub norm: String,
    pub sqrt: String,
    pub exp: String,
    pub log: String,
    pub sin: String,
    pub cos: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryOperatorNames {
    pub add: String,
    pub subtract: String,
    pub multiply: String,
    pub divide: String,
    pub outer_product: String,
    /// Contraction symbols indexed by the number of contracted indices.
    pub contractions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryNames {
    pub position: String,
    pub normal: String,
    pub jacobian: String,
    pub volume: String,
    pub boundary: String,
    pub interface: String,
    pub infinitesimal_volume: String,
    pub infinitesimal_boundary: String,
    pub infinitesimal_interface: String,
}

/// The complete set of names for one output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicNames {
    pub solution_field: String,
    pub test_function: String,
    pub trial_solution: String,
    pub integral: String,
    pub differential_operators: DifferentialOperatorNames,
    pub unary_operators: UnaryOperatorNames,
    pub binary_operators: BinaryOperatorNames,
    pub geometry: GeometryNames,
}

impl SymbolicNames {
    pub fn default_ascii() -> Self {
        let s = String::from;
        Self {
            solution_field: s("U"),
            test_function: s("d"),
            trial_solution: s("D"),
            integral: s("#"),
            differential_operators: DifferentialOperatorNames {
                value: s(""),
                gradient: s("Grad"),
                symmetric_gradient: s("symm_Grad"),
                divergence: s("Div"),
                hessian: s("Hessian"),
                laplacian: s("Lap"),
                third_derivative: s("3rd_Derivative"),
            },
            unary_operators: UnaryOperatorNames {
                negate: s("-"),
                transpose: s("trans"),
                inverse: s("inv"),
                determinant: s("det"),
                symmetrize: s("symm"),
                trace: s("tr"),
                norm: s("norm"),
                sqrt: s("sqrt"),
                exp: s("exp"),
                log: s("log"),
                sin: s("sin"),
                cos: s("cos"),
            },
            binary_operators: BinaryOperatorNames {
                add: s("+"),
                subtract: s("-"),
                multiply: s("*"),
                divide: s("/"),
                outer_product: s("otimes"),
                contractions: vec![s("*"), s("."), s(":"), s(".:"), s("::")],
            },
            geometry: GeometryNames {
                position: s("X"),
                normal: s("N"),
                jacobian: s("J"),
                volume: s("V"),
                boundary: s("A"),
                interface: s("I"),
                infinitesimal_volume: s("dV"),
                infinitesimal_boundary: s("dA"),
                infinitesimal_interface: s("dI"),
            },
        }
    }

    pub fn default_latex() -> Self {
        let s = String::from;
        Self {
            solution_field: s("\\varphi"),
            test_function: s("\\delta"),
            trial_solution: s("\\Delta"),
            integral: s("\\int"),
            differential_operators: DifferentialOperatorNames {
                value: s(""),
                gradient: s("\\nabla"),
                symmetric_gradient: s("\\nabla^{S}"),
                divergence: s("\\nabla \\cdot"),
                hessian: s("\\nabla\\nabla"),
                laplacian: s("\\nabla^{2}"),
                third_derivative: s("\\nabla\\nabla\\nabla"),
            },
            unary_operators: UnaryOperatorNames {
                negate: s("-"),
                transpose: s("^{T}"),
                inverse: s("^{-1}"),
                determinant: s("\\det"),
                symmetrize: s("\\text{symm}"),
                trace: s("\\text{tr}"),
                norm: s("\\|"),
                sqrt: s("\\sqrt"),
                exp: s("\\exp"),
                log: s("\\ln"),
                sin: s("\\sin"),
                cos: s("\\cos"),
            },
            binary_operators: BinaryOperatorNames {
                add: s("+"),
                subtract: s("-"),
                multiply: s("\\,"),
                divide: s("\\frac"),
                outer_product: s("\\otimes"),
                contractions: vec![s("\\,"), s("\\cdot"), s(":"), s("\\vdots"), s("::")],
            },
            geometry: GeometryNames {
                position: s("\\mathbf{X}"),
                normal: s("\\mathbf{N}"),
                jacobian: s("\\mathbf{J}"),
                volume: s("\\Omega"),
                boundary: s("\\partial\\Omega"),
                interface: s("\\Gamma"),
                infinitesimal_volume: s("\\textrm{d}V"),
                infinitesimal_boundary: s("\\textrm{d}A"),
                infinitesimal_interface: s("\\textrm{d}I"),
            },
        }
    }

    /// The symbol for a contraction over `n` index pairs.
    ///
    /// Falls back to a generic symbol for contractions beyond the configured list.
    pub fn contraction(&self, n: usize) -> String {
        self.binary_operators
            .contractions
            .get(n)
            .cloned()
            .unwrap_or_else(|| format!("<{n}>"))
    }
}

/// Naming conventions for both output formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicDecorations {
    naming_ascii: SymbolicNames,
    naming_latex: SymbolicNames,
}

impl Default for SymbolicDecorations {
    fn default() -> Self {
        Self {
            naming_ascii: SymbolicNames::default_ascii(),
            naming_latex: SymbolicNames::default_latex(),
        }
    }
}

impl SymbolicDecorations {
    pub fn new(naming_ascii: SymbolicNames, naming_latex: SymbolicNames) -> Self {
        Self {
            naming_ascii,
            naming_latex,
        }
    }

    pub fn naming_ascii(&self) -> &SymbolicNames {
        &self.naming_ascii
    }

    pub fn naming_latex(&self) -> &SymbolicNames {
        &self.naming_latex
    }

    pub fn naming(&self, format: Format) -> &SymbolicNames {
        match format {
            Format::Ascii => &self.naming_ascii,
            Format::Latex => &self.naming_latex,
        }
    }

    /// Apply a prefix operator, e.g. `Grad(x)` or `\nabla\left(x\right)`.
    ///
    /// An empty operator name leaves the operand unchanged.
    pub fn decorate_with_operator(&self, format: Format, operator: &str, operand: &str) -> String {
        if operator.is_empty() {
            return operand.to_string();
        }
        match format {
            Format::Ascii => format!("{operator}({operand})"),
            Format::Latex => format!("{operator}\\left({operand}\\right)"),
        }
    }

    pub fn bracket(&self, format: Format, inner: &str) -> String {
        match format {
            Format::Ascii => format!("[{inner}]"),
            Format::Latex => format!("\\left[{inner}\\right]"),
        }
    }

    /// The symbol of a test function, trial solution or solution field, e.g. `d{u}`.
    pub fn space_symbol(&self, role_symbol: &str, field_symbol: &str) -> String {
        format!("{role_symbol}{{{field_symbol}}}")
    }
}

/// Objects that can be rendered in ASCII or LaTeX.
///
/// Rendering is pure: it depends only on the object and the decorations.
pub trait Render {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String;

    fn as_ascii(&self, decorations: &SymbolicDecorations) -> String {
        self.render(decorations, Format::Ascii)
    }

    fn as_latex(&self, decorations: &SymbolicDecorations) -> String {
        self.render(decorations, Format::Latex)
    }
}
