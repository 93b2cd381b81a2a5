//! Solution vectors read by field solution operands.
use eyre::eyre;
use nalgebra::DVector;

/// A list of named global solution vectors.
///
/// Index 0 is the current solution. Further vectors, such as the solutions of previous time
/// steps, are referenced by `FieldSolution::at_index`.
#[derive(Debug, Clone)]
pub struct SolutionStorage<'a> {
    names: Vec<String>,
    vectors: Vec<&'a DVector<f64>>,
}

impl<'a> SolutionStorage<'a> {
    pub fn new(solution: &'a DVector<f64>) -> Self {
        Self {
            names: vec![String::from("solution")],
            vectors: vec![solution],
        }
    }

    /// Append a vector. It receives the next free solution index.
    pub fn push(&mut self, name: impl Into<String>, vector: &'a DVector<f64>) -> &mut Self {
        self.names.push(name.into());
        self.vectors.push(vector);
        self
    }

    pub fn n_solutions(&self) -> usize {
        self.vectors.len()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&'a DVector<f64>> {
        self.vectors.get(index).copied()
    }

    /// Returns an error unless every vector has `n_dofs` entries.
    pub fn check_size(&self, n_dofs: usize) -> eyre::Result<()> {
        for (name, vector) in self.names.iter().zip(&self.vectors) {
            if vector.len() != n_dofs {
                return Err(eyre!(
                    "solution vector \"{name}\" has {} entries, but there are {n_dofs} dofs",
                    vector.len()
                ));
            }
        }
        Ok(())
    }

    /// Gather the values of the given global dofs from every vector.
    pub fn extract_local_dof_values(&self, dofs: &[usize]) -> LocalSolution {
        let mut local = LocalSolution::default();
        self.extract_local_dof_values_into(dofs, &mut local);
        local
    }

    /// Like [`extract_local_dof_values`](Self::extract_local_dof_values), reusing the buffers
    /// of `output`.
    pub fn extract_local_dof_values_into(&self, dofs: &[usize], output: &mut LocalSolution) {
        output.values.resize_with(self.vectors.len(), Vec::new);
        for (local, global) in output.values.iter_mut().zip(&self.vectors) {
            local.clear();
            local.extend(dofs.iter().map(|&dof| global[dof]));
        }
    }
}

/// The local dof values of every solution vector on one cell, face or interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSolution {
    values: Vec<Vec<f64>>,
}

impl LocalSolution {
    pub fn from_values(values: Vec<Vec<f64>>) -> Self {
        Self { values }
    }

    pub fn n_solutions(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> Option<&[f64]> {
        self.values.get(index).map(Vec::as_slice)
    }
}
