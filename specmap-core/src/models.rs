use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

/// Fixed marker stored as the `section` of a mapping whose work item does
/// not correspond to any span of the parent's specification text. The
/// marker still carries its own length in coverage arithmetic.
pub const UNMATCHED_SECTION: &str = "[no matching section]";

/// The kinds of work item that can participate in traceability mappings.
///
/// `Api` is the root specification artifact; everything else hangs off it
/// either directly or through an intermediate work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkItemKind {
    Api,
    Requirement,
    TestSpecification,
    TestCase,
    Justification,
    Document,
}

impl WorkItemKind {
    /// Distance from the root in the fixed kind ordering
    /// `api > sw-requirement > test-specification > test-case`.
    /// Justifications and documents are always leaves.
    pub fn rank(&self) -> u8 {
        match self {
            WorkItemKind::Api => 3,
            WorkItemKind::Requirement => 2,
            WorkItemKind::TestSpecification => 1,
            WorkItemKind::TestCase => 0,
            WorkItemKind::Justification => 0,
            WorkItemKind::Document => 0,
        }
    }

    /// Canonical wire name, matching the `parent_type`/`child_type`
    /// vocabulary of the host application.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::Api => "api",
            WorkItemKind::Requirement => "sw-requirement",
            WorkItemKind::TestSpecification => "test-specification",
            WorkItemKind::TestCase => "test-case",
            WorkItemKind::Justification => "justification",
            WorkItemKind::Document => "document",
        }
    }
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkItemKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(WorkItemKind::Api),
            "sw-requirement" | "requirement" => Ok(WorkItemKind::Requirement),
            "test-specification" | "test-spec" => Ok(WorkItemKind::TestSpecification),
            "test-case" => Ok(WorkItemKind::TestCase),
            "justification" => Ok(WorkItemKind::Justification),
            "document" => Ok(WorkItemKind::Document),
            other => Err(CoreError::validation(
                "kind",
                format!("unknown work item kind: {}", other),
            )),
        }
    }
}

/// The kinds that may act as the covered side of a mapping relation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParentKind {
    Api,
    Requirement,
    TestSpecification,
}

impl ParentKind {
    pub fn as_work_item_kind(&self) -> WorkItemKind {
        match self {
            ParentKind::Api => WorkItemKind::Api,
            ParentKind::Requirement => WorkItemKind::Requirement,
            ParentKind::TestSpecification => WorkItemKind::TestSpecification,
        }
    }

    pub fn rank(&self) -> u8 {
        self.as_work_item_kind().rank()
    }
}

impl fmt::Display for ParentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_work_item_kind().as_str())
    }
}

impl std::str::FromStr for ParentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<WorkItemKind>()? {
            WorkItemKind::Api => Ok(ParentKind::Api),
            WorkItemKind::Requirement => Ok(ParentKind::Requirement),
            WorkItemKind::TestSpecification => Ok(ParentKind::TestSpecification),
            other => Err(CoreError::validation(
                "parent_type",
                format!("{} cannot act as a mapping parent", other),
            )),
        }
    }
}

/// Identifies the relation table a `(child kind, parent kind)` pair lives
/// in. Resolved through [`relation_table`], never by assembling strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationTableId {
    ApiRequirements,
    ApiTestSpecifications,
    ApiTestCases,
    ApiJustifications,
    ApiDocuments,
    RequirementTestSpecifications,
    TestSpecificationTestCases,
}

/// Looks up the relation table for a child/parent kind pair. Returns
/// `None` for combinations the domain does not allow (e.g. a document
/// mapped onto a test specification).
pub fn relation_table(child: WorkItemKind, parent: ParentKind) -> Option<RelationTableId> {
    match (child, parent) {
        (WorkItemKind::Requirement, ParentKind::Api) => Some(RelationTableId::ApiRequirements),
        (WorkItemKind::TestSpecification, ParentKind::Api) => {
            Some(RelationTableId::ApiTestSpecifications)
        }
        (WorkItemKind::TestCase, ParentKind::Api) => Some(RelationTableId::ApiTestCases),
        (WorkItemKind::Justification, ParentKind::Api) => Some(RelationTableId::ApiJustifications),
        (WorkItemKind::Document, ParentKind::Api) => Some(RelationTableId::ApiDocuments),
        (WorkItemKind::TestSpecification, ParentKind::Requirement) => {
            Some(RelationTableId::RequirementTestSpecifications)
        }
        (WorkItemKind::TestCase, ParentKind::TestSpecification) => {
            Some(RelationTableId::TestSpecificationTestCases)
        }
        _ => None,
    }
}

/// Kind-specific payload of a work item. The tag makes adding a new kind
/// a compile-time-checked change everywhere the payload is matched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum WorkItemData {
    /// The root software-component specification being traced.
    #[serde(rename = "api")]
    Api {
        name: String,
        library: String,
        library_version: String,
        /// Full specification text against which mapping offsets are
        /// computed.
        raw_specification: String,
    },
    #[serde(rename = "sw-requirement")]
    Requirement { title: String, description: String },
    #[serde(rename = "test-specification")]
    TestSpecification {
        title: String,
        preconditions: String,
        test_description: String,
        expected_behavior: String,
    },
    #[serde(rename = "test-case")]
    TestCase {
        title: String,
        description: String,
        repository: String,
        relative_path: String,
    },
    #[serde(rename = "justification")]
    Justification { description: String },
    #[serde(rename = "document")]
    Document {
        title: String,
        description: String,
        url: String,
    },
}

impl WorkItemData {
    pub fn kind(&self) -> WorkItemKind {
        match self {
            WorkItemData::Api { .. } => WorkItemKind::Api,
            WorkItemData::Requirement { .. } => WorkItemKind::Requirement,
            WorkItemData::TestSpecification { .. } => WorkItemKind::TestSpecification,
            WorkItemData::TestCase { .. } => WorkItemKind::TestCase,
            WorkItemData::Justification { .. } => WorkItemKind::Justification,
            WorkItemData::Document { .. } => WorkItemKind::Document,
        }
    }

    /// Short human-readable label for listings.
    pub fn label(&self) -> &str {
        match self {
            WorkItemData::Api { name, .. } => name,
            WorkItemData::Requirement { title, .. } => title,
            WorkItemData::TestSpecification { title, .. } => title,
            WorkItemData::TestCase { title, .. } => title,
            WorkItemData::Justification { description } => description,
            WorkItemData::Document { title, .. } => title,
        }
    }
}

/// A single work item. Identifiers are unique within a kind and never
/// reused; content changes go through the version manager, which bumps
/// `version` and appends a snapshot rather than rewriting history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u32,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub data: WorkItemData,
}

impl WorkItem {
    pub fn kind(&self) -> WorkItemKind {
        self.data.kind()
    }

    pub fn item_ref(&self) -> WorkItemRef {
        WorkItemRef {
            kind: self.kind(),
            id: self.id,
        }
    }
}

/// Reference to a work item by kind and id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkItemRef {
    pub kind: WorkItemKind,
    pub id: u32,
}

impl fmt::Display for WorkItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.id)
    }
}

/// Reference to the covered side of a mapping relation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub kind: ParentKind,
    pub id: u32,
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.id)
    }
}

/// A directed edge recording that a child work item addresses a span of a
/// parent's specification text, with a coverage weight in percent.
///
/// Relations are superseded on edit, never mutated in place; the previous
/// state is preserved as a version record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingRelation {
    pub relation_id: u32,
    pub parent: ParentRef,
    pub child: WorkItemRef,
    /// Exact substring of the parent's specification text this mapping
    /// claims to address, or [`UNMATCHED_SECTION`].
    pub section: String,
    /// Character offset of `section` within the parent text. Tie-break
    /// when several relations claim identical section text.
    pub offset: usize,
    /// Fraction of the section this child satisfies, 0-100.
    pub coverage: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

impl MappingRelation {
    /// True when the section is the "does not match any existing section"
    /// marker rather than a real excerpt.
    pub fn is_unmatched(&self) -> bool {
        self.section == UNMATCHED_SECTION
    }

    /// Section weight used by the coverage calculator, in characters.
    pub fn section_len(&self) -> usize {
        self.section.chars().count()
    }
}

/// Resolved role of an authenticated user. The core trusts the role it is
/// given; credential verification is the host's concern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
    Guest,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::Guest => write!(f, "guest"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "guest" => Ok(Role::Guest),
            other => Err(CoreError::validation(
                "role",
                format!("unknown role: {}", other),
            )),
        }
    }
}

/// The authenticated caller of a mutation, passed explicitly on every
/// call. The engine holds no ambient "current user" state.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// A registered user of a trace database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub handle: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(handle: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            role,
            created_at: Utc::now(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role)
    }
}
