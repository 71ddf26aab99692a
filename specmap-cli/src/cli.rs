use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Traceability and coverage tracking for software-assurance specifications"
)]
pub struct Cli {
    /// Path to the trace database file (YAML or SQLite)
    #[clap(long, default_value = "specmap.yaml")]
    pub file: String,

    /// Project name to use from the central registry
    #[clap(long, short = 'p')]
    pub project: Option<String>,

    /// Act as this registered user (defaults to the resident admin)
    #[clap(long = "as", value_name = "HANDLE")]
    pub acting_as: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage root specification artifacts
    #[clap(subcommand)]
    Api(ApiCommand),

    /// Manage mapping relations
    #[clap(subcommand)]
    Map(MapCommand),

    /// Show aggregate coverage for a parent artifact
    Coverage {
        /// API artifact id
        api: u32,
    },

    /// Resolve direct and indirect relations from a root artifact
    Trace {
        /// API artifact id
        api: u32,

        /// Target kind: test-specifications or test-cases
        target: String,

        /// Hide indirect relations
        #[clap(long)]
        direct_only: bool,
    },

    /// Edit a mapped work item's content (appends a new version)
    Edit {
        /// Work item kind (e.g. sw-requirement, test-case)
        kind: String,

        /// Work item id
        id: u32,

        /// API artifact the edit is authorized against
        #[clap(long)]
        api: u32,
    },

    /// Show the version history of a work item, newest first
    History {
        /// Work item kind (e.g. sw-requirement, test-case)
        kind: String,

        /// Work item id
        id: u32,
    },

    /// Manage users
    #[clap(subcommand)]
    User(UserCommand),

    /// Manage per-user permissions on an artifact
    #[clap(subcommand)]
    Perm(PermCommand),

    /// Database maintenance commands
    #[clap(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Add a new root specification artifact
    Add {
        /// Artifact name
        #[clap(long)]
        name: Option<String>,

        /// Library the artifact belongs to
        #[clap(long)]
        library: Option<String>,

        /// Library version
        #[clap(long)]
        library_version: Option<String>,

        /// File containing the raw specification text
        #[clap(long)]
        spec_file: Option<PathBuf>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// List all artifacts with their coverage
    List,

    /// Show one artifact, its mappings and coverage
    Show {
        /// API artifact id
        id: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum MapCommand {
    /// Map a newly created work item onto a parent
    Add {
        /// Parent kind: api, sw-requirement or test-specification
        #[clap(long)]
        parent_type: String,

        /// Parent id
        #[clap(long)]
        parent_id: u32,

        /// Child work item kind to create
        #[clap(long)]
        child_type: Option<String>,

        /// Section of the parent text being addressed
        #[clap(long)]
        section: Option<String>,

        /// Coverage percentage claimed for the section (0-100)
        #[clap(long)]
        coverage: Option<u32>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Map an already-existing work item onto a parent
    Existing {
        /// Parent kind: api, sw-requirement or test-specification
        #[clap(long)]
        parent_type: String,

        /// Parent id
        #[clap(long)]
        parent_id: u32,

        /// Child work item kind
        #[clap(long)]
        child_type: String,

        /// Child work item id
        #[clap(long)]
        child_id: u32,

        /// Section of the parent text being addressed
        #[clap(long)]
        section: String,

        /// Character offset of the section within the parent text
        #[clap(long, default_value_t = 0)]
        offset: usize,

        /// Coverage percentage claimed for the section (0-100)
        #[clap(long)]
        coverage: u32,
    },

    /// List relations covering a parent, in section order
    List {
        /// Parent kind: api, sw-requirement or test-specification
        #[clap(long)]
        parent_type: String,

        /// Parent id
        #[clap(long)]
        parent_id: u32,

        /// Only show children of this kind
        #[clap(long)]
        child_type: Option<String>,
    },

    /// Update a relation (supersedes it, keeping history)
    Update {
        /// Relation id
        relation_id: u32,

        /// New section text
        #[clap(long)]
        section: Option<String>,

        /// New character offset
        #[clap(long)]
        offset: Option<usize>,

        /// New coverage percentage
        #[clap(long)]
        coverage: Option<u32>,
    },

    /// Delete a relation and its dependent relations
    Del {
        /// Relation id
        relation_id: u32,

        /// Skip the confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Fork a relation's work item into an independent copy
    Fork {
        /// Relation id
        relation_id: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a new user
    Add {
        /// Unique handle
        handle: String,

        /// Role: admin, user or guest
        #[clap(long, default_value = "user")]
        role: String,
    },

    /// List all users
    List,
}

#[derive(Subcommand, Debug)]
pub enum PermCommand {
    /// Show the permission table for an artifact
    Show {
        /// API artifact id
        api: u32,
    },

    /// Set one user's permission letters on an artifact
    Set {
        /// API artifact id
        api: u32,

        /// User handle
        handle: String,

        /// Permission letters over {r, w, e, m}, e.g. "rw"
        perms: String,
    },

    /// Toggle one permission letter for every user on an artifact
    SetAll {
        /// API artifact id
        api: u32,

        /// Action: read, write, edit or own
        action: String,

        /// Revoke the letter instead of granting it
        #[clap(long)]
        revoke: bool,
    },

    /// Copy the full permission table from one artifact onto others
    Copy {
        /// Source API artifact id
        source: u32,

        /// Target API artifact ids
        #[clap(required = true)]
        targets: Vec<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Register a project in the registry
    Register {
        /// Name of the project
        name: String,

        /// Path to the trace database file
        #[clap(long)]
        path: PathBuf,

        /// Description of the project
        #[clap(long, default_value = "")]
        description: String,

        /// Set this project as the default
        #[clap(long)]
        default: bool,
    },

    /// Print the path to the trace database file
    Path {
        /// The name of the project to look up
        #[clap(long)]
        name: Option<String>,
    },

    /// Migrate a database between YAML and SQLite backends
    Migrate {
        /// Source database file
        from: PathBuf,

        /// Destination database file
        to: PathBuf,
    },

    /// Export the database to a JSON file
    Export {
        /// Destination JSON file
        output: PathBuf,
    },

    /// Show database statistics
    Stats,
}
