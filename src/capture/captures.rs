//! Ordered collection of named intermediates

use anyhow::Result;
use candle_core::Tensor;

/// Named tensors in the order they were produced
#[derive(Debug, Clone, Default)]
pub struct Captures {
    entries: Vec<(String, Tensor)>,
}

impl Captures {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tensor; each name may be captured once
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            anyhow::bail!("Intermediate {} captured twice", name);
        }
        self.entries.push((name, tensor));
        Ok(())
    }

    /// Append another collection, keeping its order
    pub fn extend(&mut self, other: Captures) -> Result<()> {
        for (name, tensor) in other.entries {
            self.insert(name, tensor)?;
        }
        Ok(())
    }

    /// Tensor captured under `name`
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, tensor)| tensor)
    }

    /// Names in capture order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Entries in capture order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(key, tensor)| (key.as_str(), tensor))
    }

    /// Number of captured tensors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name and shape of every capture, for printing
    pub fn shape_summary(&self) -> Vec<(String, Vec<usize>)> {
        self.entries
            .iter()
            .map(|(key, tensor)| (key.clone(), tensor.dims().to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_insertion_order_and_lookup() {
        let device = Device::Cpu;
        let mut captures = Captures::new();
        captures.insert("b", Tensor::zeros(2, DType::F32, &device).unwrap()).unwrap();
        captures.insert("a", Tensor::zeros((1, 3), DType::F32, &device).unwrap()).unwrap();

        assert_eq!(captures.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(captures.get("a").unwrap().dims(), &[1, 3]);
        assert!(captures.get("c").is_none());
        assert_eq!(
            captures.shape_summary(),
            vec![("b".to_string(), vec![2]), ("a".to_string(), vec![1, 3])]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let device = Device::Cpu;
        let t = Tensor::zeros(1, DType::F32, &device).unwrap();

        let mut captures = Captures::new();
        captures.insert("x", t.clone()).unwrap();
        assert!(captures.insert("x", t.clone()).is_err());

        let mut other = Captures::new();
        other.insert("x", t).unwrap();
        assert!(captures.extend(other).is_err());
    }
}
