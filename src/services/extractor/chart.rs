use super::{first_text, items, list_items, resolve_characters, JobCategory, LinkableItem, Placement, ResourceStrategy};
use crate::core::state::{AspectRatio, AssetKind, CharacterSelection, ImageJob, ResourceKind};
use serde_json::Value;

/// A titled banner plus one icon per row.
pub struct Chart;

impl ResourceStrategy for Chart {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Chart
    }

    fn derive_jobs(&self, content: &Value, selection: Option<&CharacterSelection>) -> Vec<ImageJob> {
        let placement = Placement::from_content(content);
        let mut jobs = Vec::new();

        if let Some(prompt) = first_text(content, &["headerPrompt"]) {
            jobs.push(
                ImageJob::new("chart_header", AssetKind::ChartHeader, prompt, AspectRatio::Banner)
                    .with_text()
                    .with_label("Header", "Header"),
            );
        }

        for (i, row) in items(content, "rows").iter().enumerate() {
            let Some(prompt) = first_text(row, &["iconPrompt", "label"]) else {
                continue;
            };
            let label = first_text(row, &["label"]).unwrap_or_else(|| format!("Row {}", i + 1));
            jobs.push(
                ImageJob::new(format!("chart_icon_{}", i), AssetKind::ChartIcon, prompt, AspectRatio::Square)
                    .with_characters(resolve_characters(row, selection, JobCategory::Icon, placement))
                    .green_screen()
                    .with_label(label, "Icons"),
            );
        }

        jobs
    }

    fn linkable_items(&self, content: &Value) -> Vec<LinkableItem> {
        list_items(content, "rows", "row")
    }

    fn item_key_hint(&self) -> &'static str {
        "row_{index}"
    }

    fn content_instructions(&self) -> &'static str {
        r#"{ "title": "...", "headerPrompt": "decorative banner behind the title", "columns": ["..."], "rows": [ { "label": "...", "cells": ["..."], "iconPrompt": "small icon for this row" } ] }"#
    }
}
