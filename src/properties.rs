/// [crate::properties] holds the identity primitives every construct is built from: ids, revision
/// tokens, construct kinds and locators, plus the well-known PSI and XSD locators.
pub use enumset::EnumSet;
use enumset::*;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use url::Url;

pub use uuid::Uuid;

use crate::error::TopicStoreError;

/// The topicstore namespace UUID. Topic map ids are generated under this namespace, and every
/// construct id carries the namespace bytes of the topic map that owns it.
pub const UUID_NAMESPACE_TOPICSTORE: Uuid = Uuid::from_bytes([
    0x1c, 0x7e, 0x4a, 0x90, 0x5d, 0x2b, 0x4f, 0x0e, 0x8a, 0x61, 0x3b, 0x94, 0xe2, 0x07, 0xd5, 0x18,
]);

const ID_NAMESPACE_NIL: [u8; 6] = [0u8; 6];

pub fn generate_namespace<U: AsRef<Uuid>>(node: U) -> ConstructId {
    ConstructId(Uuid::new_v5(
        &UUID_NAMESPACE_TOPICSTORE,
        node.as_ref().as_bytes(),
    ))
}

/// Construct ID
///
/// A UUID (v6) whose node bytes are derived from the owning topic map's id, so a construct id
/// identifies the topic map it was minted in. Ids are never reused: a merged-away construct keeps
/// its id as a forwarding tombstone.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConstructId(Uuid);

impl ConstructId {
    pub fn new<U: AsRef<ConstructId>>(topicmap: U) -> Self {
        ConstructId(Uuid::now_v6(&topicmap.as_ref().namespace_bytes()))
    }

    /// Mint an id for a fresh topic map.
    pub fn new_topic_map() -> Self {
        ConstructId::new(ConstructId(UUID_NAMESPACE_TOPICSTORE))
    }

    pub fn nil() -> Self {
        ConstructId(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn initialized(&self) -> bool {
        self.parent_namespace_bytes() != ID_NAMESPACE_NIL
    }

    /// The least significant 6 bytes of the id: the namespace of the topic map that minted it.
    pub fn parent_namespace_bytes(&self) -> [u8; 6] {
        let bytes = self.0.as_bytes();
        [
            bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]
    }

    pub fn namespace_bytes(&self) -> [u8; 6] {
        generate_namespace(self).parent_namespace_bytes()
    }

    /// True when `id` was minted inside the topic map identified by `self`.
    pub fn is_parent_of(&self, id: &ConstructId) -> bool {
        id.parent_namespace_bytes() == self.namespace_bytes()
    }
}

impl AsRef<Uuid> for ConstructId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl AsRef<ConstructId> for ConstructId {
    fn as_ref(&self) -> &ConstructId {
        self
    }
}

impl From<Uuid> for ConstructId {
    fn from(id: Uuid) -> Self {
        ConstructId(id)
    }
}

impl TryFrom<&str> for ConstructId {
    type Error = TopicStoreError;

    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Ok(ConstructId(Uuid::parse_str(string)?))
    }
}

impl Display for ConstructId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

impl From<ConstructId> for String {
    fn from(val: ConstructId) -> Self {
        format!("{val}")
    }
}

/// Opaque optimistic-concurrency token handed out by a [crate::store::DocumentStore] on every
/// write. Stores shape it as `{generation}-{digest}`.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(generation: u64, digest: &str) -> Self {
        Revision(format!("{generation}-{digest}"))
    }

    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(generation, _)| generation.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Revision {
    fn from(rev: String) -> Self {
        Revision(rev)
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// [ConstructKind] enumerates the node types of the topic map graph. The serialized names double
/// as the `documenttype` field of stored documents.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstructKind {
    TopicMap,
    Topic,
    Association,
    Role,
    Name,
    Occurrence,
    Variant,
}

pub type ConstructKindSet = EnumSet<ConstructKind>;

impl ConstructKind {
    /// Kinds that may carry a reifier.
    pub const REIFIABLE: ConstructKindSet = enum_set!(
        ConstructKind::TopicMap
            | ConstructKind::Association
            | ConstructKind::Role
            | ConstructKind::Name
            | ConstructKind::Occurrence
            | ConstructKind::Variant
    );

    /// Kinds with exactly one type.
    pub const TYPED: ConstructKindSet = enum_set!(
        ConstructKind::Association
            | ConstructKind::Role
            | ConstructKind::Name
            | ConstructKind::Occurrence
    );

    /// Kinds with a scope.
    pub const SCOPED: ConstructKindSet = enum_set!(
        ConstructKind::Association
            | ConstructKind::Name
            | ConstructKind::Occurrence
            | ConstructKind::Variant
    );

    pub fn is_reifiable(&self) -> bool {
        ConstructKind::REIFIABLE.contains(*self)
    }

    pub fn is_typed(&self) -> bool {
        ConstructKind::TYPED.contains(*self)
    }

    pub fn is_scoped(&self) -> bool {
        ConstructKind::SCOPED.contains(*self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::TopicMap => "TOPIC_MAP",
            ConstructKind::Topic => "TOPIC",
            ConstructKind::Association => "ASSOCIATION",
            ConstructKind::Role => "ROLE",
            ConstructKind::Name => "NAME",
            ConstructKind::Occurrence => "OCCURRENCE",
            ConstructKind::Variant => "VARIANT",
        }
    }
}

impl Display for ConstructKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ConstructKind {
    type Error = TopicStoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        EnumSet::<ConstructKind>::all()
            .iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| TopicStoreError::Serialization(format!("Unknown document type {value}")))
    }
}

/// The three ways a locator can identify a construct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentifierKind {
    ItemIdentifier,
    SubjectIdentifier,
    SubjectLocator,
}

impl Display for IdentifierKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKind::ItemIdentifier => write!(f, "item identifier"),
            IdentifierKind::SubjectIdentifier => write!(f, "subject identifier"),
            IdentifierKind::SubjectLocator => write!(f, "subject locator"),
        }
    }
}

/// An absolute IRI used as item identifier, subject identifier, subject locator, datatype or topic
/// map locator. Equality is by the normalized string form.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Locator(String);

impl Locator {
    pub fn parse(iri: &str) -> Result<Self, TopicStoreError> {
        let url = Url::parse(iri)?;
        Ok(Locator(url.to_string()))
    }

    /// Resolve a possibly relative reference against this locator.
    pub fn resolve(&self, reference: &str) -> Result<Self, TopicStoreError> {
        let base = Url::parse(&self.0)?;
        Ok(Locator(base.join(reference)?.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Only for the well-known constants below, which are valid by construction.
    fn from_static(iri: &'static str) -> Self {
        Locator(iri.to_string())
    }
}

impl TryFrom<String> for Locator {
    type Error = TopicStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Locator::parse(&value)
    }
}

impl TryFrom<&str> for Locator {
    type Error = TopicStoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Locator::parse(value)
    }
}

impl From<Locator> for String {
    fn from(val: Locator) -> Self {
        val.0
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix of the item identifier assigned to topics created without any identity.
pub const GENERATED_IID_PREFIX: &str = "urn:x-topicstore:";

pub static XSD_STRING: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://www.w3.org/2001/XMLSchema#string"));
pub static XSD_ANY_URI: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://www.w3.org/2001/XMLSchema#anyURI"));
pub static XSD_INTEGER: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://www.w3.org/2001/XMLSchema#integer"));
pub static XSD_DECIMAL: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://www.w3.org/2001/XMLSchema#decimal"));

/// Default type of names created without an explicit type.
pub static PSI_TOPIC_NAME: Lazy<Locator> = Lazy::new(|| {
    Locator::from_static("http://psi.topicmaps.org/iso13250/model/topic-name")
});
pub static PSI_TYPE_INSTANCE: Lazy<Locator> = Lazy::new(|| {
    Locator::from_static("http://psi.topicmaps.org/iso13250/model/type-instance")
});
pub static PSI_TYPE: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://psi.topicmaps.org/iso13250/model/type"));
pub static PSI_INSTANCE: Lazy<Locator> =
    Lazy::new(|| Locator::from_static("http://psi.topicmaps.org/iso13250/model/instance"));
