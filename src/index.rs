//! Read-only index views over a [TopicMap].
//!
//! Indexes hold no state of their own. Every call is answered from [IndexQuery] lookups against
//! the backing store, overlaid with the topic map's cache, so results always reflect the surviving
//! constructs.
use std::collections::BTreeSet;

use crate::{
    construct::Construct,
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, Locator, XSD_ANY_URI},
    store::IndexQuery,
    topicmap::TopicMap,
};

/// Combine per-key hit lists: intersection when `match_all`, union otherwise.
fn combine(hits: Vec<Vec<ConstructId>>, match_all: bool) -> Vec<ConstructId> {
    let mut sets = hits
        .into_iter()
        .map(|h| h.into_iter().collect::<BTreeSet<ConstructId>>());
    let Some(first) = sets.next() else {
        return Vec::new();
    };
    let combined = sets.fold(first, |acc, set| {
        if match_all {
            acc.intersection(&set).copied().collect()
        } else {
            acc.union(&set).copied().collect()
        }
    });
    combined.into_iter().collect()
}

fn used_types(constructs: &[Construct]) -> Vec<ConstructId> {
    constructs
        .iter()
        .filter_map(Construct::r#type)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn used_themes(constructs: &[Construct]) -> Vec<ConstructId> {
    constructs
        .iter()
        .filter_map(Construct::scope)
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub struct TypeInstanceIndex<'a> {
    topicmap: &'a mut TopicMap,
}

impl<'a> TypeInstanceIndex<'a> {
    pub fn new(topicmap: &'a mut TopicMap) -> Self {
        TypeInstanceIndex { topicmap }
    }

    fn query(&self) -> IndexQuery {
        IndexQuery::new(self.topicmap.id())
    }

    /// Topics that are instances of any (or, with `match_all`, every) of `types`. An empty
    /// `types` slice selects topics without any type.
    pub fn topics_of_type(
        &mut self,
        types: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        if types.is_empty() {
            let query = self.query().kind(ConstructKind::Topic);
            let topics = self.topicmap.find(&query)?;
            let mut untyped = Vec::new();
            for topic in topics {
                if topic.topic()?.types.is_empty() {
                    untyped.push(topic.id);
                }
            }
            return Ok(untyped);
        }
        let mut hits = Vec::new();
        for r#type in types {
            let r#type = self.topicmap.resolve(*r#type)?;
            let query = self.query().kind(ConstructKind::Topic).instance_of(r#type);
            hits.push(self.topicmap.query(&query)?);
        }
        Ok(combine(hits, match_all))
    }

    fn of_type(
        &mut self,
        kind: ConstructKind,
        r#type: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        let r#type = self.topicmap.resolve(r#type)?;
        let query = self.query().kind(kind).typed(r#type);
        self.topicmap.query(&query)
    }

    pub fn associations_of_type(
        &mut self,
        r#type: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.of_type(ConstructKind::Association, r#type)
    }

    pub fn roles_of_type(&mut self, r#type: ConstructId) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.of_type(ConstructKind::Role, r#type)
    }

    pub fn names_of_type(&mut self, r#type: ConstructId) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.of_type(ConstructKind::Name, r#type)
    }

    pub fn occurrences_of_type(
        &mut self,
        r#type: ConstructId,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.of_type(ConstructKind::Occurrence, r#type)
    }

    /// Every topic used as the type of some topic.
    pub fn topic_types(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        let query = self.query().kind(ConstructKind::Topic);
        let topics = self.topicmap.find(&query)?;
        let mut types = BTreeSet::new();
        for topic in topics {
            types.extend(topic.topic()?.types.iter().copied());
        }
        Ok(types.into_iter().collect())
    }

    fn types_of(&mut self, kind: ConstructKind) -> Result<Vec<ConstructId>, TopicStoreError> {
        let query = self.query().kind(kind);
        let constructs = self.topicmap.find(&query)?;
        Ok(used_types(&constructs))
    }

    pub fn association_types(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.types_of(ConstructKind::Association)
    }

    pub fn role_types(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.types_of(ConstructKind::Role)
    }

    pub fn name_types(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.types_of(ConstructKind::Name)
    }

    pub fn occurrence_types(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.types_of(ConstructKind::Occurrence)
    }
}

pub struct ScopedIndex<'a> {
    topicmap: &'a mut TopicMap,
}

impl<'a> ScopedIndex<'a> {
    pub fn new(topicmap: &'a mut TopicMap) -> Self {
        ScopedIndex { topicmap }
    }

    /// Constructs of `kind` whose scope contains any (or, with `match_all`, every) of `themes`.
    /// An empty `themes` slice selects the unconstrained scope.
    fn in_scope(
        &mut self,
        kind: ConstructKind,
        themes: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        let tm = self.topicmap.id();
        if themes.is_empty() {
            let query = IndexQuery::new(tm).kind(kind).scope(std::iter::empty());
            return self.topicmap.query(&query);
        }
        let mut hits = Vec::new();
        for theme in themes {
            let theme = self.topicmap.resolve(*theme)?;
            hits.push(self.topicmap.query(&IndexQuery::new(tm).kind(kind).theme(theme))?);
        }
        Ok(combine(hits, match_all))
    }

    pub fn associations_in_scope(
        &mut self,
        themes: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.in_scope(ConstructKind::Association, themes, match_all)
    }

    pub fn names_in_scope(
        &mut self,
        themes: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.in_scope(ConstructKind::Name, themes, match_all)
    }

    pub fn occurrences_in_scope(
        &mut self,
        themes: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.in_scope(ConstructKind::Occurrence, themes, match_all)
    }

    pub fn variants_in_scope(
        &mut self,
        themes: &[ConstructId],
        match_all: bool,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.in_scope(ConstructKind::Variant, themes, match_all)
    }

    fn themes_of(&mut self, kind: ConstructKind) -> Result<Vec<ConstructId>, TopicStoreError> {
        let query = IndexQuery::new(self.topicmap.id()).kind(kind);
        let constructs = self.topicmap.find(&query)?;
        Ok(used_themes(&constructs))
    }

    pub fn association_themes(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.themes_of(ConstructKind::Association)
    }

    pub fn name_themes(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.themes_of(ConstructKind::Name)
    }

    pub fn occurrence_themes(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.themes_of(ConstructKind::Occurrence)
    }

    pub fn variant_themes(&mut self) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.themes_of(ConstructKind::Variant)
    }
}

pub struct LiteralIndex<'a> {
    topicmap: &'a mut TopicMap,
}

impl<'a> LiteralIndex<'a> {
    pub fn new(topicmap: &'a mut TopicMap) -> Self {
        LiteralIndex { topicmap }
    }

    fn by_value(
        &mut self,
        kind: ConstructKind,
        value: &str,
        datatype: Option<&Locator>,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        let mut query = IndexQuery::new(self.topicmap.id()).kind(kind).value(value);
        if let Some(datatype) = datatype {
            query = query.datatype(datatype.clone());
        }
        self.topicmap.query(&query)
    }

    pub fn names_by_value(&mut self, value: &str) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.by_value(ConstructKind::Name, value, None)
    }

    /// Occurrences with `value`, of any datatype unless one is given.
    pub fn occurrences_by_value(
        &mut self,
        value: &str,
        datatype: Option<&Locator>,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.by_value(ConstructKind::Occurrence, value, datatype)
    }

    pub fn variants_by_value(
        &mut self,
        value: &str,
        datatype: Option<&Locator>,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.by_value(ConstructKind::Variant, value, datatype)
    }

    /// Occurrences whose value is `locator` typed as `xsd:anyURI`.
    pub fn occurrences_by_locator(
        &mut self,
        locator: &Locator,
    ) -> Result<Vec<ConstructId>, TopicStoreError> {
        self.by_value(ConstructKind::Occurrence, locator.as_str(), Some(&*XSD_ANY_URI))
    }
}
