//! Property DUMP export — write every stored property as diagnostic lines.
//!
//! ```text
//! // prov-props DUMP
//! // Relations: 2
//! // Properties: 3
//!
//! // 1->2@0
//! env = prod
//! owner = null
//! ```
//!
//! Lines use [`PropertyEntry::render`] without the relation; each relation
//! gets its own comment header. Purely presentational, not meant to be
//! parsed back.

use std::io::Write;

use crate::model::PropertyEntry;
use crate::storage::PropertyBackend;
use crate::{codec, Result};

/// Dump the whole store, one relation block at a time, relations in key order.
pub async fn export_property_dump<B: PropertyBackend>(
    backend: &B,
    writer: &mut dyn Write,
) -> Result<()> {
    let relations = backend.relations().await?;

    writeln!(writer, "// prov-props DUMP")?;
    writeln!(writer, "// Relations: {}", relations.len())?;
    writeln!(writer, "// Properties: {}", backend.property_count().await?)?;

    for relation in &relations {
        let rel = codec::encode(relation)?;
        let entries = backend.list_by_relation(&rel).await?;
        if entries.is_empty() {
            continue;
        }
        writeln!(writer)?;
        writeln!(writer, "// {relation}")?;
        for entry in &entries {
            writeln!(writer, "{}", entry.render(false))?;
        }
    }
    Ok(())
}

/// Render a flat list of entries, one per line, with relations inline.
pub fn render_entries(entries: &[PropertyEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.render(true));
        out.push('\n');
    }
    out
}
