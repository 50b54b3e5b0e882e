//! Fixture files: a `config` entry followed by named tensor records

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::Path;

use super::tensor_json::{decode_tensor, encode_tensor, TensorJson};

/// Key holding the hyperparameter record in every fixture
pub const CONFIG_KEY: &str = "config";

/// A serialized fixture, kept in insertion order
#[derive(Debug, Clone)]
pub struct TensorFixture {
    /// Metadata written under the `config` key
    pub config: serde_json::Value,
    entries: Vec<(String, TensorJson)>,
}

impl TensorFixture {
    /// Encode a sequence of named tensors
    pub fn from_tensors<'a, I>(config: serde_json::Value, tensors: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a Tensor)>,
    {
        let mut fixture = Self {
            config,
            entries: Vec::new(),
        };
        for (name, tensor) in tensors {
            let record = encode_tensor(tensor)
                .with_context(|| format!("Failed to encode tensor {}", name))?;
            fixture.push(name, record)?;
        }
        Ok(fixture)
    }

    fn push(&mut self, name: &str, record: TensorJson) -> Result<()> {
        if name == CONFIG_KEY {
            anyhow::bail!("Tensor name {:?} collides with the config entry", name);
        }
        if self.get(name).is_some() {
            anyhow::bail!("Duplicate tensor name in fixture: {}", name);
        }
        self.entries.push((name.to_string(), record));
        Ok(())
    }

    /// Look up an encoded record
    pub fn get(&self, name: &str) -> Option<&TensorJson> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, record)| record)
    }

    /// Tensor keys in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Number of tensor entries (excluding config)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no tensors are stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a single tensor
    pub fn tensor(&self, name: &str, device: &Device) -> Result<Tensor> {
        let record = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Fixture has no tensor named {}", name))?;
        decode_tensor(record, device).with_context(|| format!("Failed to decode tensor {}", name))
    }

    /// Decode every tensor, preserving order
    pub fn tensors(&self, device: &Device) -> Result<Vec<(String, Tensor)>> {
        self.entries
            .iter()
            .map(|(name, record)| {
                let tensor = decode_tensor(record, device)
                    .with_context(|| format!("Failed to decode tensor {}", name))?;
                Ok((name.clone(), tensor))
            })
            .collect()
    }

    /// Pretty-printed JSON with 4-space indentation
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Parse a fixture from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(content).context("Fixture is not a JSON object")?;

        let mut config = serde_json::Value::Null;
        let mut fixture_entries = Vec::with_capacity(root.len());
        for (key, value) in root {
            if key == CONFIG_KEY {
                config = value;
                continue;
            }
            let record: TensorJson = serde_json::from_value(value)
                .with_context(|| format!("Malformed tensor record: {}", key))?;
            fixture_entries.push((key, record));
        }

        let mut fixture = Self {
            config,
            entries: Vec::new(),
        };
        for (key, record) in fixture_entries {
            fixture.push(&key, record)?;
        }
        Ok(fixture)
    }

    /// Write the whole fixture in one go, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let content = self.to_json_string()?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Read a fixture file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {:?}", path))?;
        Self::from_json_str(&content).with_context(|| format!("Failed to parse fixture {:?}", path))
    }
}

impl Serialize for TensorFixture {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry(CONFIG_KEY, &self.config)?;
        for (name, record) in &self.entries {
            map.serialize_entry(name, record)?;
        }
        map.end()
    }
}
