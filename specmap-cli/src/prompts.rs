use anyhow::{bail, Result};
use inquire::{Confirm, Select, Text};

use specmap_core::{WorkItemData, WorkItemKind, UNMATCHED_SECTION};

/// Prompts for a new root specification artifact.
pub fn prompt_new_api() -> Result<(String, String, String, String)> {
    let name = Text::new("Artifact name:").prompt()?;
    let library = Text::new("Library:").prompt()?;
    let library_version = Text::new("Library version:").prompt()?;

    // Use the Editor type for multiline input
    let raw_specification = inquire::Editor::new("Specification text:").prompt()?;

    Ok((name, library, library_version, raw_specification))
}

/// Prompts for the kind of work item to map.
pub fn prompt_child_kind() -> Result<WorkItemKind> {
    let options = vec![
        WorkItemKind::Requirement,
        WorkItemKind::TestSpecification,
        WorkItemKind::TestCase,
        WorkItemKind::Justification,
        WorkItemKind::Document,
    ];
    Ok(Select::new("Work item kind:", options).prompt()?)
}

/// Prompts for the content fields of a work item of the given kind.
pub fn prompt_work_item_data(kind: WorkItemKind) -> Result<WorkItemData> {
    match kind {
        WorkItemKind::Api => bail!("api artifacts are created with `specmap api add`"),
        WorkItemKind::Requirement => {
            let title = Text::new("Title:").prompt()?;
            let description = inquire::Editor::new("Description:").prompt()?;
            Ok(WorkItemData::Requirement { title, description })
        }
        WorkItemKind::TestSpecification => {
            let title = Text::new("Title:").prompt()?;
            let preconditions = Text::new("Preconditions:").prompt()?;
            let test_description = inquire::Editor::new("Test description:").prompt()?;
            let expected_behavior = Text::new("Expected behavior:").prompt()?;
            Ok(WorkItemData::TestSpecification {
                title,
                preconditions,
                test_description,
                expected_behavior,
            })
        }
        WorkItemKind::TestCase => {
            let title = Text::new("Title:").prompt()?;
            let description = Text::new("Description:").prompt()?;
            let repository = Text::new("Repository:").prompt()?;
            let relative_path = Text::new("Relative path:").prompt()?;
            Ok(WorkItemData::TestCase {
                title,
                description,
                repository,
                relative_path,
            })
        }
        WorkItemKind::Justification => {
            let description = inquire::Editor::new("Justification:").prompt()?;
            Ok(WorkItemData::Justification { description })
        }
        WorkItemKind::Document => {
            let title = Text::new("Title:").prompt()?;
            let description = Text::new("Description:").prompt()?;
            let url = Text::new("URL:").prompt()?;
            Ok(WorkItemData::Document {
                title,
                description,
                url,
            })
        }
    }
}

/// Prompts for the section/offset/coverage of a mapping. When the parent
/// has specification text, the offset is located automatically from the
/// first occurrence of the section.
pub fn prompt_mapping_details(parent_text: Option<&str>) -> Result<(String, usize, u32)> {
    let section = Text::new("Section text (leave empty if nothing matches):").prompt()?;

    let (section, offset) = if section.is_empty() {
        (UNMATCHED_SECTION.to_string(), 0)
    } else {
        match locate_section(parent_text, &section) {
            Some(offset) => (section, offset),
            None => {
                let mark = Confirm::new(
                    "Section not found in the specification text. Mark as unmatched?",
                )
                .with_default(true)
                .prompt()?;
                if mark {
                    (UNMATCHED_SECTION.to_string(), 0)
                } else {
                    let offset = Text::new("Character offset:").prompt()?.parse::<usize>()?;
                    (section, offset)
                }
            }
        }
    };

    let coverage = Text::new("Coverage (0-100):").prompt()?.parse::<u32>()?;
    Ok((section, offset, coverage))
}

/// First occurrence of `section` within the parent text, as a character
/// offset. `None` when the parent has no text or no match.
pub fn locate_section(parent_text: Option<&str>, section: &str) -> Option<usize> {
    let text = parent_text?;
    let byte_offset = text.find(section)?;
    Some(text[..byte_offset].chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_section_returns_char_offset() {
        // Multi-byte characters before the match shift byte and char
        // offsets apart; the mapping offset is in characters.
        let text = "héllo wörld target";
        assert_eq!(locate_section(Some(text), "target"), Some(12));
        assert_eq!(locate_section(Some(text), "absent"), None);
        assert_eq!(locate_section(None, "target"), None);
    }
}
