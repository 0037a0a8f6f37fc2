//! Resource-type vocabulary.
//!
//! Archives tag every entry with a type string. Only a small declared set
//! flows through the modifying paths; everything else is extract-only at
//! most. Combinations of kinds are modeled as [`TypeSet`]s rather than
//! bit-twiddled integers.

use std::collections::BTreeSet;
use std::fmt;

/// One asset class the toolchain understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    RsStreamfile,
    EntityDef,
    LogicClass,
    LogicEntity,
    LogicFx,
    LogicLibrary,
    LogicUiWidget,
    LogicObjectDescriptor,
    MapEntities,
    Image,
}

impl ResourceType {
    pub const ALL: [ResourceType; 10] = [
        ResourceType::RsStreamfile,
        ResourceType::EntityDef,
        ResourceType::LogicClass,
        ResourceType::LogicEntity,
        ResourceType::LogicFx,
        ResourceType::LogicLibrary,
        ResourceType::LogicUiWidget,
        ResourceType::LogicObjectDescriptor,
        ResourceType::MapEntities,
        ResourceType::Image,
    ];

    /// The exact type string as it appears in archive string tables.
    pub fn type_string(self) -> &'static str {
        match self {
            ResourceType::RsStreamfile => "rs_streamfile",
            ResourceType::EntityDef => "entityDef",
            ResourceType::LogicClass => "logicClass",
            ResourceType::LogicEntity => "logicEntity",
            ResourceType::LogicFx => "logicFX",
            ResourceType::LogicLibrary => "logicLibrary",
            ResourceType::LogicUiWidget => "logicUIWidget",
            ResourceType::LogicObjectDescriptor => "logicObjectDescriptor",
            ResourceType::MapEntities => "mapentities",
            ResourceType::Image => "image",
        }
    }

    pub fn from_type_string(s: &str) -> Option<Self> {
        ResourceType::ALL
            .iter()
            .copied()
            .find(|t| t.type_string() == s)
    }

    /// Whether mod files of this type may be injected into a synthesized
    /// archive. Kept deliberately narrow: every other class needs dependency
    /// records the builder does not emit.
    pub fn allows_mod_files(self) -> bool {
        matches!(self, ResourceType::RsStreamfile)
    }

    pub fn is_logic_decl(self) -> bool {
        matches!(
            self,
            ResourceType::LogicClass
                | ResourceType::LogicEntity
                | ResourceType::LogicFx
                | ResourceType::LogicLibrary
                | ResourceType::LogicUiWidget
        )
    }

    /// Types whose payloads are reflection-serialized binary trees.
    pub fn is_serialized(self) -> bool {
        self.is_logic_decl()
            || matches!(self, ResourceType::EntityDef | ResourceType::MapEntities)
    }

    /// Types that carry no file extension in their archive names.
    pub fn has_no_extension(self) -> bool {
        self.is_serialized()
    }

    /// Types whose entries carry a streamdb default hash.
    pub fn has_streamdb_hash(self) -> bool {
        matches!(self, ResourceType::MapEntities | ResourceType::Image)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_string())
    }
}

/// An ordered set of resource types, used for extraction filters.
pub type TypeSet = BTreeSet<ResourceType>;

/// Parse a filter set from config strings, logging unknown names.
pub fn parse_type_set<'a>(names: impl Iterator<Item = &'a str>) -> TypeSet {
    let mut set = TypeSet::new();
    for name in names {
        match ResourceType::from_type_string(name) {
            Some(t) => {
                set.insert(t);
            }
            None => tracing::warn!("unknown resource type '{name}' in filter, skipping"),
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_strings_roundtrip() {
        for t in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_string(t.type_string()), Some(t));
        }
        assert_eq!(ResourceType::from_type_string("bogus"), None);
    }

    #[test]
    fn predicates() {
        assert!(ResourceType::LogicFx.is_logic_decl());
        assert!(!ResourceType::RsStreamfile.is_logic_decl());
        assert!(ResourceType::MapEntities.is_serialized());
        assert!(!ResourceType::Image.is_serialized());
        assert!(ResourceType::Image.has_streamdb_hash());
        assert!(ResourceType::RsStreamfile.allows_mod_files());
        assert!(!ResourceType::EntityDef.allows_mod_files());
    }

    #[test]
    fn filter_parsing_skips_unknowns() {
        let set = parse_type_set(["rs_streamfile", "nope", "image"].into_iter());
        assert_eq!(set.len(), 2);
        assert!(set.contains(&ResourceType::RsStreamfile));
        assert!(set.contains(&ResourceType::Image));
    }
}
