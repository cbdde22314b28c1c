//! The `Memory` tagged sum type and its variant discriminant.
//!
//! Per the design notes, dynamic "generic memory" polymorphism is replaced
//! with an explicit tagged enum: every operation that is polymorphic in
//! variant (loading by id, attaching to a topic, indexing) dispatches on
//! [`MemoryVariant`] rather than duck-typing a shared struct.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The discriminant stored alongside a memory id wherever other components
/// (links, topics, neighborhoods, episodes) need to know which table to
/// load it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryVariant {
    Strategic,
    Episodic,
    Procedural,
    Cube,
    Semantic,
}

impl MemoryVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryVariant::Strategic => "strategic",
            MemoryVariant::Episodic => "episodic",
            MemoryVariant::Procedural => "procedural",
            MemoryVariant::Cube => "cube",
            MemoryVariant::Semantic => "semantic",
        }
    }
}

impl fmt::Display for MemoryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strategic" => Ok(MemoryVariant::Strategic),
            "episodic" => Ok(MemoryVariant::Episodic),
            "procedural" => Ok(MemoryVariant::Procedural),
            "cube" => Ok(MemoryVariant::Cube),
            "semantic" => Ok(MemoryVariant::Semantic),
            other => anyhow::bail!("unknown memory variant: {other}"),
        }
    }
}

/// A strategic memory: a principle-like memory with confidence and
/// decay semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicMemory {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_applied_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The shared shape of episodic, procedural, and semantic memories —
/// each lives in the same `memories` table, distinguished by `variant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericMemory {
    pub id: String,
    pub variant: MemoryVariant,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// A memcube: a versioned, parented artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemCube {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub version: u64,
    pub parent_id: Option<String>,
    pub scope: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The polymorphic memory type. Operations that need to work across
/// variants dispatch on the tag rather than duck-typing a shared struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum Memory {
    Strategic(StrategicMemory),
    Episodic(GenericMemory),
    Procedural(GenericMemory),
    Semantic(GenericMemory),
    Cube(MemCube),
}

impl Memory {
    pub fn id(&self) -> &str {
        match self {
            Memory::Strategic(m) => &m.id,
            Memory::Episodic(m) | Memory::Procedural(m) | Memory::Semantic(m) => &m.id,
            Memory::Cube(m) => &m.id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Memory::Strategic(m) => &m.content,
            Memory::Episodic(m) | Memory::Procedural(m) | Memory::Semantic(m) => &m.content,
            Memory::Cube(m) => &m.content,
        }
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Memory::Strategic(m) => m.embedding.as_deref(),
            Memory::Episodic(m) | Memory::Procedural(m) | Memory::Semantic(m) => {
                m.embedding.as_deref()
            }
            Memory::Cube(m) => m.embedding.as_deref(),
        }
    }

    pub fn variant(&self) -> MemoryVariant {
        match self {
            Memory::Strategic(_) => MemoryVariant::Strategic,
            Memory::Episodic(_) => MemoryVariant::Episodic,
            Memory::Procedural(_) => MemoryVariant::Procedural,
            Memory::Semantic(_) => MemoryVariant::Semantic,
            Memory::Cube(_) => MemoryVariant::Cube,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_round_trips_through_str() {
        for v in [
            MemoryVariant::Strategic,
            MemoryVariant::Episodic,
            MemoryVariant::Procedural,
            MemoryVariant::Cube,
            MemoryVariant::Semantic,
        ] {
            let s = v.as_str();
            let parsed: MemoryVariant = s.parse().unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn unknown_variant_str_errors() {
        assert!("bogus".parse::<MemoryVariant>().is_err());
    }

    #[test]
    fn memory_dispatches_on_tag() {
        let m = Memory::Semantic(GenericMemory {
            id: "id-1".into(),
            variant: MemoryVariant::Semantic,
            content: "fact".into(),
            embedding: Some(vec![1.0, 0.0]),
            metadata: None,
            created_at: "now".into(),
            updated_at: "now".into(),
        });
        assert_eq!(m.id(), "id-1");
        assert_eq!(m.content(), "fact");
        assert_eq!(m.variant(), MemoryVariant::Semantic);
        assert_eq!(m.embedding(), Some(&[1.0, 0.0][..]));
    }
}
