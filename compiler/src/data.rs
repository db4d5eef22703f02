// data.rs — Data descriptors and the per-program descriptor table
//
// A descriptor gives a container's element type, symbolic shape and strides,
// storage class, transient flag and lifetime. Names are unique per program;
// the table rejects duplicates instead of overwriting.

use std::collections::{BTreeMap, BTreeSet};

use crate::dtypes::{AllocationLifetime, ElementType, StorageType};
use crate::error::{SdfgError, SdfgResult};
use crate::symbolic::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Array,
    Scalar,
}

/// Declaration of one data container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub kind: DataKind,
    pub dtype: ElementType,
    pub shape: Vec<Expr>,
    pub strides: Vec<Expr>,
    pub storage: StorageType,
    pub transient: bool,
    pub lifetime: AllocationLifetime,
}

impl Data {
    /// An array with row-major strides derived from `shape`.
    pub fn array(dtype: ElementType, shape: Vec<Expr>) -> Self {
        let strides = row_major_strides(&shape);
        Data {
            kind: DataKind::Array,
            dtype,
            shape,
            strides,
            storage: StorageType::Default,
            transient: false,
            lifetime: AllocationLifetime::Scope,
        }
    }

    /// A single value. Scalars have shape `[1]`.
    pub fn scalar(dtype: ElementType) -> Self {
        Data {
            kind: DataKind::Scalar,
            dtype,
            shape: vec![Expr::one()],
            strides: vec![Expr::one()],
            storage: StorageType::Register,
            transient: false,
            lifetime: AllocationLifetime::Scope,
        }
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_lifetime(mut self, lifetime: AllocationLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_strides(mut self, strides: Vec<Expr>) -> Self {
        self.strides = strides;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element count: the product of the shape.
    pub fn total_size(&self) -> Expr {
        let product = self
            .shape
            .iter()
            .cloned()
            .fold(Expr::one(), Expr::mul);
        product.simplify().unwrap_or(product)
    }

    /// Symbols used by the shape and strides.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        self.shape
            .iter()
            .chain(&self.strides)
            .flat_map(Expr::free_symbols)
            .collect()
    }
}

/// Row-major strides: the last dimension is contiguous.
pub fn row_major_strides(shape: &[Expr]) -> Vec<Expr> {
    let mut strides = vec![Expr::one(); shape.len()];
    let mut acc = Expr::one();
    for (i, extent) in shape.iter().enumerate().rev() {
        strides[i] = acc.clone();
        let next = Expr::mul(acc, extent.clone());
        acc = next.simplify().unwrap_or(next);
    }
    strides
}

/// Name → descriptor map of one program, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    entries: BTreeMap<String, Data>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Data) -> SdfgResult<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(SdfgError::DuplicateData(name));
        }
        self.entries.insert(name, data);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Data> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Data> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Data> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Data)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(text: &str) -> Expr {
        Expr::parse(text).unwrap().simplify().unwrap()
    }

    #[test]
    fn default_strides_are_row_major() {
        let d = Data::array(ElementType::Float64, vec![e("M"), e("N"), Expr::Int(4)]);
        let strides: Vec<String> = d.strides.iter().map(ToString::to_string).collect();
        assert_eq!(strides, vec!["4*N", "4", "1"]);
        assert_eq!(d.total_size().to_string(), "4*M*N");
    }

    #[test]
    fn scalar_has_unit_shape() {
        let s = Data::scalar(ElementType::Int32);
        assert_eq!(s.rank(), 1);
        assert_eq!(s.total_size(), Expr::one());
        assert_eq!(s.kind, DataKind::Scalar);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut table = DescriptorTable::new();
        table
            .insert("A", Data::array(ElementType::Float32, vec![e("N")]))
            .unwrap();
        let err = table
            .insert("A", Data::scalar(ElementType::Float32))
            .unwrap_err();
        assert!(matches!(err, SdfgError::DuplicateData(ref n) if n == "A"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn builder_flags() {
        let d = Data::array(ElementType::Float64, vec![e("N")])
            .with_storage(StorageType::GpuGlobal)
            .with_lifetime(AllocationLifetime::State)
            .transient();
        assert!(d.transient);
        assert_eq!(d.storage, StorageType::GpuGlobal);
        assert_eq!(d.lifetime, AllocationLifetime::State);
        assert_eq!(d.free_symbols().into_iter().collect::<Vec<_>>(), vec!["N"]);
    }
}
