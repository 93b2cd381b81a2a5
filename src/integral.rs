//! Integration domains and symbolic integrals.
//!
//! An integral pairs an integrand with a domain: the cells of the mesh ([`VolumeIntegral`]),
//! the faces on the domain boundary ([`BoundaryIntegral`]) or the interior faces between two
//! cells ([`InterfaceIntegral`]). Each domain can be restricted to a set of sub-domain ids.
use std::collections::BTreeSet;
use std::ops::Neg;

use itertools::Itertools;

use crate::decorations::{Format, Render, SymbolicDecorations};
use crate::flags::UpdateFlags;

pub type MaterialId = u32;
pub type BoundaryId = u32;
pub type ManifoldId = u32;

/// The id that stands for "no particular sub-domain".
///
/// A sub-domain set that contains nothing but this id selects the entire domain.
pub const INVALID_ID: u32 = u32::MAX;

/// The set of sub-domains an integral is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubDomains {
    /// The entire domain.
    All,
    /// Only the listed ids.
    Only(BTreeSet<u32>),
    /// No sub-domain at all. Admits nothing.
    Nothing,
}

impl SubDomains {
    /// Build a sub-domain set from a list of ids.
    ///
    /// An empty list, or a list containing only [`INVALID_ID`], selects the entire domain.
    /// Otherwise [`INVALID_ID`] entries are dropped.
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let ids: BTreeSet<u32> = ids.into_iter().collect();
        if ids.is_empty() || ids.iter().all(|&id| id == INVALID_ID) {
            Self::All
        } else {
            Self::Only(ids.into_iter().filter(|&id| id != INVALID_ID).collect())
        }
    }

    pub fn is_entire_domain(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn contains(&self, id: u32) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(&id),
            Self::Nothing => false,
        }
    }
}

/// Read access to the sub-domain ids of a cell and its faces.
pub trait CellAccessor {
    fn material_id(&self) -> MaterialId;

    fn n_faces(&self) -> usize;

    fn face_at_boundary(&self, face: usize) -> bool;

    fn face_boundary_id(&self, face: usize) -> BoundaryId;

    fn face_manifold_id(&self, face: usize) -> ManifoldId;
}

/// Integration over the cells of the mesh, restricted by material id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIntegral {
    subdomains: SubDomains,
}

/// Integration over the faces on the boundary of the mesh, restricted by boundary id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryIntegral {
    subdomains: SubDomains,
}

/// Integration over interior faces shared by two cells, restricted by manifold id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIntegral {
    subdomains: SubDomains,
}

macro_rules! integral_constructors {
    ($name:ident) => {
        impl $name {
            pub fn new(subdomains: SubDomains) -> Self {
                Self { subdomains }
            }

            pub fn entire_domain() -> Self {
                Self::new(SubDomains::All)
            }

            pub fn over(ids: impl IntoIterator<Item = u32>) -> Self {
                Self::new(SubDomains::from_ids(ids))
            }

            pub fn subdomains(&self) -> &SubDomains {
                &self.subdomains
            }

            pub fn integrate_over_entire_domain(&self) -> bool {
                self.subdomains.is_entire_domain()
            }
        }
    };
}

integral_constructors!(VolumeIntegral);
integral_constructors!(BoundaryIntegral);
integral_constructors!(InterfaceIntegral);

impl VolumeIntegral {
    pub fn admits_cell(&self, cell: &impl CellAccessor) -> bool {
        self.subdomains.is_entire_domain() || self.subdomains.contains(cell.material_id())
    }
}

impl BoundaryIntegral {
    pub fn admits_face(&self, cell: &impl CellAccessor, face: usize) -> bool {
        if !cell.face_at_boundary(face) {
            return false;
        }
        self.subdomains.is_entire_domain() || self.subdomains.contains(cell.face_boundary_id(face))
    }
}

impl InterfaceIntegral {
    pub fn admits_face(&self, cell: &impl CellAccessor, face: usize) -> bool {
        if cell.face_at_boundary(face) {
            return false;
        }
        self.subdomains.is_entire_domain() || self.subdomains.contains(cell.face_manifold_id(face))
    }
}

/// The kind of an integration domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DomainKind {
    Volume,
    Boundary,
    Interface,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationDomain {
    Volume(VolumeIntegral),
    Boundary(BoundaryIntegral),
    Interface(InterfaceIntegral),
}

impl From<VolumeIntegral> for IntegrationDomain {
    fn from(integral: VolumeIntegral) -> Self {
        Self::Volume(integral)
    }
}

impl From<BoundaryIntegral> for IntegrationDomain {
    fn from(integral: BoundaryIntegral) -> Self {
        Self::Boundary(integral)
    }
}

impl From<InterfaceIntegral> for IntegrationDomain {
    fn from(integral: InterfaceIntegral) -> Self {
        Self::Interface(integral)
    }
}

impl IntegrationDomain {
    pub fn kind(&self) -> DomainKind {
        match self {
            Self::Volume(_) => DomainKind::Volume,
            Self::Boundary(_) => DomainKind::Boundary,
            Self::Interface(_) => DomainKind::Interface,
        }
    }

    pub fn subdomains(&self) -> &SubDomains {
        match self {
            Self::Volume(integral) => integral.subdomains(),
            Self::Boundary(integral) => integral.subdomains(),
            Self::Interface(integral) => integral.subdomains(),
        }
    }

    pub fn integrate_over_entire_domain(&self) -> bool {
        self.subdomains().is_entire_domain()
    }

    /// Whether the domain admits the cell (`face == None`) or the given face of the cell.
    ///
    /// Volume integrals only admit cells; boundary and interface integrals only admit faces.
    pub fn admits(&self, cell: &impl CellAccessor, face: Option<usize>) -> bool {
        match (self, face) {
            (Self::Volume(integral), None) => integral.admits_cell(cell),
            (Self::Boundary(integral), Some(face)) => integral.admits_face(cell, face),
            (Self::Interface(integral), Some(face)) => integral.admits_face(cell, face),
            _ => false,
        }
    }

    fn render_infinitesimal(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let geometry = &decorations.naming(format).geometry;
        let infinitesimal = match self {
            Self::Volume(_) => &geometry.infinitesimal_volume,
            Self::Boundary(_) => &geometry.infinitesimal_boundary,
            Self::Interface(_) => &geometry.infinitesimal_interface,
        };
        infinitesimal.clone()
    }

    fn render_subdomains(&self, decorations: &SymbolicDecorations, format: Format) -> Option<String> {
        let ids = match self.subdomains() {
            SubDomains::All => return None,
            SubDomains::Only(ids) => ids.iter().join(","),
            SubDomains::Nothing => String::new(),
        };
        let geometry = &decorations.naming(format).geometry;
        let domain = match self {
            Self::Volume(_) => &geometry.volume,
            Self::Boundary(_) => &geometry.boundary,
            Self::Interface(_) => &geometry.interface,
        };
        Some(match format {
            Format::Ascii => format!("{domain}={ids}"),
            Format::Latex => format!("{domain}_{{{ids}}}"),
        })
    }
}

/// Things that can be integrated: forms, and scalar expressions for plain functionals.
///
/// Integrals themselves are not integrands, so integrals cannot be nested.
pub trait Integrand: Render + Clone + Sized {
    /// The quantities needed to evaluate the integrand.
    fn integrand_update_flags(&self) -> UpdateFlags;

    fn integrate(&self, domain: impl Into<IntegrationDomain>) -> SymbolicIntegral<Self> {
        SymbolicIntegral::new(domain.into(), self.clone())
    }

    /// Integral over all cells.
    fn dv(&self) -> SymbolicIntegral<Self> {
        self.integrate(VolumeIntegral::entire_domain())
    }

    /// Integral over the cells with the given material ids.
    fn dv_on(&self, material_ids: impl IntoIterator<Item = MaterialId>) -> SymbolicIntegral<Self> {
        self.integrate(VolumeIntegral::over(material_ids))
    }

    /// Integral over all boundary faces.
    fn da(&self) -> SymbolicIntegral<Self> {
        self.integrate(BoundaryIntegral::entire_domain())
    }

    fn da_on(&self, boundary_ids: impl IntoIterator<Item = BoundaryId>) -> SymbolicIntegral<Self> {
        self.integrate(BoundaryIntegral::over(boundary_ids))
    }

    /// Integral over all interior faces.
    fn di(&self) -> SymbolicIntegral<Self> {
        self.integrate(InterfaceIntegral::entire_domain())
    }

    fn di_on(&self, manifold_ids: impl IntoIterator<Item = ManifoldId>) -> SymbolicIntegral<Self> {
        self.integrate(InterfaceIntegral::over(manifold_ids))
    }
}

/// An integrand paired with an integration domain.
#[derive(Debug, Clone)]
pub struct SymbolicIntegral<I> {
    domain: IntegrationDomain,
    integrand: I,
    negated: bool,
}

impl<I: Integrand> SymbolicIntegral<I> {
    pub fn new(domain: IntegrationDomain, integrand: I) -> Self {
        Self {
            domain,
            integrand,
            negated: false,
        }
    }

    pub fn domain(&self) -> &IntegrationDomain {
        &self.domain
    }

    pub fn integrand(&self) -> &I {
        &self.integrand
    }

    /// Whether the integral enters with a negative sign.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// `+1.0` or `-1.0`.
    pub fn sign(&self) -> f64 {
        if self.negated {
            -1.0
        } else {
            1.0
        }
    }

    /// The integrand's flags plus the JxW values every integral needs.
    pub fn update_flags(&self) -> UpdateFlags {
        self.integrand.integrand_update_flags() | UpdateFlags::JXW_VALUES
    }

    pub fn integrate_over_entire_domain(&self) -> bool {
        self.domain.integrate_over_entire_domain()
    }
}

impl<I: Integrand> Neg for SymbolicIntegral<I> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self {
            negated: !self.negated,
            ..self
        }
    }
}

impl<I: Integrand> Render for SymbolicIntegral<I> {
    fn render(&self, decorations: &SymbolicDecorations, format: Format) -> String {
        let naming = decorations.naming(format);
        let integrand = self.integrand.render(decorations, format);
        let infinitesimal = self.domain.render_infinitesimal(decorations, format);
        let subdomains = self.domain.render_subdomains(decorations, format);
        let sign = if self.negated { "-" } else { "" };
        match format {
            Format::Ascii => {
                let restriction = subdomains.map(|s| format!("({s})")).unwrap_or_default();
                format!("{sign}{}{integrand}{}{infinitesimal}{restriction}", naming.integral, naming.integral)
            }
            Format::Latex => {
                let limits = subdomains.map(|s| format!("\\limits_{{{s}}}")).unwrap_or_default();
                format!("{sign}{}{limits} {integrand} {infinitesimal}", naming.integral)
            }
        }
    }
}
