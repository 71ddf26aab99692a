mod cli;
mod prompts;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::Path;

use specmap_core::db::{migrate_sqlite_to_yaml, migrate_yaml_to_sqlite};
use specmap_core::{
    determine_database_path, get_registry_path, library_coverage, resolve, resolved_work_items,
    Action, Actor, Engine, MappingUpdate, Origin, ParentKind, ParentRef, PermissionSet, Registry,
    Role, TraceTarget, WorkItemData, WorkItemKind, WorkItemRef,
};

use crate::cli::{ApiCommand, Cli, Command, DbCommand, MapCommand, PermCommand, UserCommand};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // Database maintenance commands manage paths and registries
    // themselves and must not create a database file as a side effect.
    if let Command::Db(db_cmd) = &cli.command {
        return handle_db_command(db_cmd, &cli);
    }

    let db_path = determine_database_path(cli.project.as_deref(), &cli.file)?;
    let engine = Engine::open(&db_path, None)?;
    let actor = engine.resolve_actor(cli.acting_as.as_deref())?;

    match &cli.command {
        Command::Api(api_cmd) => handle_api_command(api_cmd, &engine, &actor)?,
        Command::Map(map_cmd) => handle_map_command(map_cmd, &engine, &actor)?,
        Command::Coverage { api } => show_coverage(&engine, *api)?,
        Command::Trace {
            api,
            target,
            direct_only,
        } => trace_relations(&engine, *api, target, *direct_only)?,
        Command::Edit { kind, id, api } => edit_work_item(&engine, kind, *id, *api, &actor)?,
        Command::History { kind, id } => show_history(&engine, kind, *id)?,
        Command::User(user_cmd) => handle_user_command(user_cmd, &engine)?,
        Command::Perm(perm_cmd) => handle_perm_command(perm_cmd, &engine, &actor)?,
        Command::Db(_) => unreachable!("handled above"),
    }

    Ok(())
}

fn parse_parent(parent_type: &str, parent_id: u32) -> Result<ParentRef> {
    let kind = parent_type.parse::<ParentKind>()?;
    Ok(ParentRef {
        kind,
        id: parent_id,
    })
}

fn parse_item(kind: &str, id: u32) -> Result<WorkItemRef> {
    let kind = kind.parse::<WorkItemKind>()?;
    Ok(WorkItemRef { kind, id })
}

/// Specification text of a parent, when the parent is a text-bearing
/// artifact. Used to locate section offsets automatically.
fn parent_spec_text(engine: &Engine, parent: ParentRef) -> Result<Option<String>> {
    if parent.kind != ParentKind::Api {
        return Ok(None);
    }
    let store = engine.load()?;
    let api = store.get_api(parent.id)?;
    match &api.data {
        WorkItemData::Api {
            raw_specification, ..
        } => Ok(Some(raw_specification.clone())),
        _ => Ok(None),
    }
}

fn coverage_colored(value: f64) -> colored::ColoredString {
    let text = format!("{:.1}%", value);
    if value >= 75.0 {
        text.green()
    } else if value >= 25.0 {
        text.yellow()
    } else {
        text.red()
    }
}

// =============================================================================
// api
// =============================================================================

fn handle_api_command(cmd: &ApiCommand, engine: &Engine, actor: &Actor) -> Result<()> {
    match cmd {
        ApiCommand::Add {
            name,
            library,
            library_version,
            spec_file,
            interactive,
        } => {
            let should_be_interactive = *interactive
                || (name.is_none()
                    && library.is_none()
                    && library_version.is_none()
                    && spec_file.is_none());

            let (name, library, library_version, raw_specification) = if should_be_interactive {
                prompts::prompt_new_api()?
            } else {
                let name = name.clone().context("--name is required")?;
                let library = library.clone().context("--library is required")?;
                let library_version = library_version
                    .clone()
                    .context("--library-version is required")?;
                let spec_file = spec_file.as_ref().context("--spec-file is required")?;
                let raw_specification = std::fs::read_to_string(spec_file)
                    .with_context(|| format!("Failed to read {:?}", spec_file))?;
                (name, library, library_version, raw_specification)
            };

            let api_id =
                engine.add_api(&name, &library, &library_version, raw_specification, actor)?;
            println!("{}", "Artifact added successfully!".green());
            println!("ID: {}", api_id.to_string().green());
        }
        ApiCommand::List => {
            let store = engine.load()?;
            let apis = store.list_apis();
            if apis.is_empty() {
                println!("{}", "No artifacts found.".yellow());
                return Ok(());
            }
            println!(
                "{:<6} {:<24} {:<20} {:<10} {}",
                "ID".bold(),
                "NAME".bold(),
                "LIBRARY".bold(),
                "VERSION".bold(),
                "COVERAGE".bold()
            );
            let mut by_library: Vec<(String, Vec<f64>)> = Vec::new();
            for api in apis {
                if let WorkItemData::Api {
                    name,
                    library,
                    library_version,
                    ..
                } = &api.data
                {
                    let parent = ParentRef {
                        kind: ParentKind::Api,
                        id: api.id,
                    };
                    let coverage = store.coverage_for(parent);
                    println!(
                        "{:<6} {:<24} {:<20} {:<10} {}",
                        api.id,
                        name,
                        library,
                        library_version,
                        coverage_colored(coverage)
                    );
                    match by_library.iter_mut().find(|(lib, _)| lib == library) {
                        Some((_, values)) => values.push(coverage),
                        None => by_library.push((library.clone(), vec![coverage])),
                    }
                }
            }
            // Library totals are the plain mean of each artifact's
            // already-rounded coverage.
            println!("\n{}:", "Library coverage".bold());
            for (library, values) in by_library {
                println!(
                    "  {:<20} {}",
                    library,
                    coverage_colored(library_coverage(&values))
                );
            }
        }
        ApiCommand::Show { id } => {
            let store = engine.load()?;
            let api = store.get_api(*id)?;
            let parent = ParentRef {
                kind: ParentKind::Api,
                id: *id,
            };
            if let WorkItemData::Api {
                name,
                library,
                library_version,
                raw_specification,
            } = &api.data
            {
                println!("{}: {}", "Artifact".bold(), name);
                println!("{}: {} {}", "Library".bold(), library, library_version);
                println!("{}: {}", "Version".bold(), api.version);
                println!(
                    "{}: {} characters",
                    "Specification".bold(),
                    raw_specification.chars().count()
                );
                println!(
                    "{}: {}",
                    "Coverage".bold(),
                    coverage_colored(store.coverage_for(parent))
                );
            }
            let relations = store.list_for_parent(parent, None);
            if !relations.is_empty() {
                println!("\n{}:", "Mappings".green());
                for rel in relations {
                    print_relation_row(&store, rel);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// map
// =============================================================================

fn print_relation_row(store: &specmap_core::TraceStore, rel: &specmap_core::MappingRelation) {
    let label = store
        .get_work_item(rel.child)
        .map(|item| item.data.label().to_string())
        .unwrap_or_else(|| "<missing>".into());
    let section = if rel.is_unmatched() {
        rel.section.yellow().to_string()
    } else {
        let excerpt: String = rel.section.chars().take(40).collect();
        format!("\"{}\"", excerpt)
    };
    println!(
        "  #{:<5} {:<20} {:<28} offset {:<6} {:<6} {}",
        rel.relation_id,
        rel.child.to_string(),
        label.chars().take(28).collect::<String>(),
        rel.offset,
        format!("{}%", rel.coverage),
        section
    );
}

fn handle_map_command(cmd: &MapCommand, engine: &Engine, actor: &Actor) -> Result<()> {
    match cmd {
        MapCommand::Add {
            parent_type,
            parent_id,
            child_type,
            section,
            coverage,
            interactive,
        } => {
            let parent = parse_parent(parent_type, *parent_id)?;
            let kind = match child_type {
                Some(s) => s.parse::<WorkItemKind>()?,
                None => prompts::prompt_child_kind()?,
            };
            let data = prompts::prompt_work_item_data(kind)?;
            let text = parent_spec_text(engine, parent)?;

            let (section, offset, coverage) = match (section, coverage) {
                (Some(section), Some(coverage)) if !*interactive => {
                    let offset = match &text {
                        Some(t) => prompts::locate_section(Some(t), section).context(
                            "section text not found in the parent specification; \
                             run without --section to map interactively",
                        )?,
                        None => 0,
                    };
                    (section.clone(), offset, *coverage)
                }
                _ => prompts::prompt_mapping_details(text.as_deref())?,
            };

            let relation_id = engine.map_new(parent, data, &section, offset, coverage, actor)?;
            println!("{}", "Mapping added successfully!".green());
            println!("Relation ID: {}", relation_id.to_string().green());
        }
        MapCommand::Existing {
            parent_type,
            parent_id,
            child_type,
            child_id,
            section,
            offset,
            coverage,
        } => {
            let parent = parse_parent(parent_type, *parent_id)?;
            let child = parse_item(child_type, *child_id)?;
            let text = parent_spec_text(engine, parent)?;
            let offset = prompts::locate_section(text.as_deref(), section).unwrap_or(*offset);

            let relation_id =
                engine.map_existing(parent, child, section, offset, *coverage, actor)?;
            println!("{}", "Mapping added successfully!".green());
            println!("Relation ID: {}", relation_id.to_string().green());
        }
        MapCommand::List {
            parent_type,
            parent_id,
            child_type,
        } => {
            let parent = parse_parent(parent_type, *parent_id)?;
            let filter = match child_type {
                Some(s) => Some(s.parse::<WorkItemKind>()?),
                None => None,
            };
            let store = engine.load()?;
            let relations = store.list_for_parent(parent, filter);
            if relations.is_empty() {
                println!("{}", "No mappings found.".yellow());
                return Ok(());
            }
            for rel in relations {
                print_relation_row(&store, rel);
            }
            println!(
                "\n{}: {}",
                "Coverage".bold(),
                coverage_colored(store.coverage_for(parent))
            );
        }
        MapCommand::Update {
            relation_id,
            section,
            offset,
            coverage,
        } => {
            let update = MappingUpdate {
                section: section.clone(),
                offset: *offset,
                coverage: *coverage,
            };
            let updated = engine.update_mapping(*relation_id, update, actor)?;
            println!("{}", "Mapping updated successfully!".green());
            println!(
                "Relation #{} now covers {}% at offset {}",
                updated.relation_id, updated.coverage, updated.offset
            );
        }
        MapCommand::Del { relation_id, yes } => {
            if !*yes {
                let confirmed = inquire::Confirm::new(&format!(
                    "Delete relation #{} and its dependent relations?",
                    relation_id
                ))
                .with_default(false)
                .prompt()?;
                if !confirmed {
                    println!("{}", "Aborted.".yellow());
                    return Ok(());
                }
            }
            let deleted = engine.delete_mapping(*relation_id, actor)?;
            println!(
                "{} {} relation(s): {:?}",
                "Deleted".red(),
                deleted.len(),
                deleted
            );
        }
        MapCommand::Fork { relation_id } => {
            let new_relation_id = engine.fork_mapping(*relation_id, actor)?;
            let store = engine.load()?;
            let forked = store
                .get_relation(new_relation_id)
                .context("forked relation vanished")?;
            println!("{}", "Fork created successfully!".green());
            println!(
                "Relation ID: {} (new {})",
                new_relation_id.to_string().green(),
                forked.child
            );
        }
    }
    Ok(())
}

// =============================================================================
// coverage / trace / edit / history
// =============================================================================

fn show_coverage(engine: &Engine, api_id: u32) -> Result<()> {
    engine.load()?.get_api(api_id)?;
    let parent = ParentRef {
        kind: ParentKind::Api,
        id: api_id,
    };
    let relations = engine.list_for_parent(parent, None)?;
    println!(
        "{}: {} ({} mapping(s))",
        "Coverage".bold(),
        coverage_colored(engine.coverage_for(parent)?),
        relations.len()
    );
    Ok(())
}

fn trace_relations(engine: &Engine, api_id: u32, target: &str, direct_only: bool) -> Result<()> {
    let target = target.parse::<TraceTarget>()?;
    let store = engine.load()?;
    let set = resolve(&store, api_id, target)?;

    let shown: Vec<_> = resolved_work_items(&store, &set)
        .into_iter()
        .filter(|(_, origin)| !direct_only || *origin == Origin::Direct)
        .collect();

    if shown.is_empty() {
        println!("{}", "No relations found.".yellow());
        return Ok(());
    }
    for (item, origin) in shown {
        let tag = match origin {
            Origin::Direct => "direct".green(),
            Origin::Indirect => "indirect".cyan(),
        };
        println!(
            "{:<9} {:<20} {}",
            tag,
            item.item_ref().to_string(),
            item.data.label()
        );
    }
    Ok(())
}

fn edit_work_item(engine: &Engine, kind: &str, id: u32, api_id: u32, actor: &Actor) -> Result<()> {
    let item = parse_item(kind, id)?;
    {
        let store = engine.load()?;
        let current = store
            .get_work_item(item)
            .with_context(|| format!("work item not found: {}", item))?;
        println!("Editing {} ({})", item, current.data.label().cyan());
    }
    let new_data = prompts::prompt_work_item_data(item.kind)?;
    let version = engine.edit_work_item(item, new_data, api_id, actor)?;
    println!("{}", "Work item updated successfully!".green());
    println!("Version: {}", version.to_string().green());
    Ok(())
}

fn show_history(engine: &Engine, kind: &str, id: u32) -> Result<()> {
    let item = parse_item(kind, id)?;
    let records = engine.history(item)?;
    if records.is_empty() {
        println!("{}", "No history found.".yellow());
        return Ok(());
    }
    for record in records {
        let mapping_note = if record.mapping.is_some() {
            " (mapping updated)".cyan().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {} by {}{}",
            format!("v{}", record.version).bold(),
            record.created_at.to_rfc3339(),
            record.created_by,
            mapping_note
        );
        println!("  {}", serde_json_line(&record.object));
    }
    Ok(())
}

fn serde_json_line(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unprintable>".into())
}

// =============================================================================
// user / perm
// =============================================================================

fn handle_user_command(cmd: &UserCommand, engine: &Engine) -> Result<()> {
    match cmd {
        UserCommand::Add { handle, role } => {
            let role = role.parse::<Role>()?;
            let user_id = engine.add_user(handle, role)?;
            println!("{}", "User added successfully!".green());
            println!("ID: {}", user_id.to_string().green());
        }
        UserCommand::List => {
            let store = engine.load()?;
            if store.users.is_empty() {
                println!("{}", "No users found.".yellow());
                return Ok(());
            }
            println!("{:<20} {:<8} {}", "HANDLE".bold(), "ROLE".bold(), "ID".bold());
            for user in &store.users {
                println!("{:<20} {:<8} {}", user.handle, user.role.to_string(), user.id);
            }
        }
    }
    Ok(())
}

fn handle_perm_command(cmd: &PermCommand, engine: &Engine, actor: &Actor) -> Result<()> {
    match cmd {
        PermCommand::Show { api } => {
            let store = engine.load()?;
            store.get_api(*api)?;
            let entries: Vec<_> = store
                .permissions
                .iter()
                .filter(|e| e.api_id == *api)
                .collect();
            if entries.is_empty() {
                println!("{}", "No permissions granted.".yellow());
                return Ok(());
            }
            println!("{:<20} {:<8} {}", "HANDLE".bold(), "ROLE".bold(), "PERMS".bold());
            for entry in entries {
                let (handle, role) = store
                    .users
                    .iter()
                    .find(|u| u.id == entry.user_id)
                    .map(|u| (u.handle.clone(), u.role.to_string()))
                    .unwrap_or_else(|| (entry.user_id.to_string(), "?".into()));
                println!(
                    "{:<20} {:<8} {}",
                    handle,
                    role,
                    store.permission_for(entry.user_id, *api).as_letters().cyan()
                );
            }
        }
        PermCommand::Set { api, handle, perms } => {
            let store = engine.load()?;
            let user = store
                .get_user_by_handle(handle)
                .with_context(|| format!("user not found: {}", handle))?;
            let user_id = user.id;
            let perms = PermissionSet::from_letters(perms)?;
            let effective = engine.set_permission(user_id, *api, perms)?;
            println!(
                "{} {} now holds `{}` on api {}",
                "OK".green(),
                handle,
                effective.as_letters().cyan(),
                api
            );
        }
        PermCommand::SetAll { api, action, revoke } => {
            let action = action.parse::<Action>()?;
            let updated = engine.set_all(*api, action, !*revoke)?;
            println!(
                "{} {} user(s) updated",
                "OK".green(),
                updated.len().to_string().bold()
            );
        }
        PermCommand::Copy { source, targets } => {
            let outcome = engine.copy_permissions(*source, targets, actor)?;
            for api_id in &outcome.copied {
                println!("{} permissions copied onto api {}", "OK".green(), api_id);
            }
            for (api_id, reason) in &outcome.failed {
                println!("{} api {}: {}", "FAILED".red(), api_id, reason);
            }
            if !outcome.failed.is_empty() {
                bail!("{} target(s) failed", outcome.failed.len());
            }
        }
    }
    Ok(())
}

// =============================================================================
// db
// =============================================================================

fn handle_db_command(cmd: &DbCommand, cli: &Cli) -> Result<()> {
    match cmd {
        DbCommand::Register {
            name,
            path,
            description,
            default,
        } => {
            let registry_path = get_registry_path()?;
            Registry::create_default(&registry_path)?;
            let mut registry = Registry::load(&registry_path)?;
            registry.register_project(
                name.clone(),
                path.to_string_lossy().into_owned(),
                description.clone(),
            );
            if *default {
                registry.set_default_project(name)?;
            }
            registry.save(&registry_path)?;
            println!("{}", "Project registered successfully!".green());
        }
        DbCommand::Path { name } => {
            let path = determine_database_path(
                name.as_deref().or(cli.project.as_deref()),
                &cli.file,
            )?;
            println!("{}", path.display());
        }
        DbCommand::Migrate { from, to } => {
            let count = match (extension(from), extension(to)) {
                ("yaml" | "yml", "db" | "sqlite" | "sqlite3") => migrate_yaml_to_sqlite(from, to)?,
                ("db" | "sqlite" | "sqlite3", "yaml" | "yml") => migrate_sqlite_to_yaml(from, to)?,
                (from_ext, to_ext) => bail!(
                    "cannot migrate from .{} to .{}; one side must be YAML, the other SQLite",
                    from_ext,
                    to_ext
                ),
            };
            println!(
                "{} {} work item(s) migrated",
                "OK".green(),
                count.to_string().bold()
            );
        }
        DbCommand::Export { output } => {
            let db_path = determine_database_path(cli.project.as_deref(), &cli.file)?;
            let engine = Engine::open(&db_path, None)?;
            let store = engine.load()?;
            specmap_core::db::export_to_json(&store, output)?;
            println!("{} exported to {}", "OK".green(), output.display());
        }
        DbCommand::Stats => {
            let db_path = determine_database_path(cli.project.as_deref(), &cli.file)?;
            let engine = Engine::open(&db_path, None)?;
            let stats = engine.stats()?;
            println!("{}: {}", "Backend".bold(), engine.backend().backend_type());
            println!("{}: {}", "APIs".bold(), stats.api_count);
            println!("{}: {}", "Requirements".bold(), stats.requirement_count);
            println!(
                "{}: {}",
                "Test specifications".bold(),
                stats.test_specification_count
            );
            println!("{}: {}", "Test cases".bold(), stats.test_case_count);
            println!("{}: {}", "Justifications".bold(), stats.justification_count);
            println!("{}: {}", "Documents".bold(), stats.document_count);
            println!("{}: {}", "Relations".bold(), stats.relation_count);
            println!("{}: {}", "Users".bold(), stats.user_count);
            println!("{}: {}", "Version records".bold(), stats.version_count);
        }
    }
    Ok(())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}
