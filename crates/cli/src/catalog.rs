//! Read-only catalog commands: `types`, `show` and `health`.

use std::fmt::Display;

use serde::Serialize;

use settlerec_recon::config::{ReconTypeConfig, ToleranceRule};
use settlerec_recon::{Registry, ENGINE_VERSION};

use crate::CliError;

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
    println!("{json}");
    Ok(())
}

pub fn cmd_types(registry: &Registry, json: bool) -> Result<(), CliError> {
    let types = registry.list();
    if json {
        return print_json(&types);
    }

    let width = types.iter().map(|t| t.id.len()).max().unwrap_or(0).max(2);
    println!("{:<width$}  {}", "ID", "NAME");
    for t in &types {
        println!("{:<width$}  {}", t.id, t.name);
        let slots: Vec<String> = t
            .slots
            .iter()
            .map(|s| format!("{}={}", s.name, s.side))
            .collect();
        println!("{:<width$}  slots: {}", "", slots.join(", "));
    }
    Ok(())
}

fn describe_tolerance(rule: &ToleranceRule) -> String {
    let mut parts = Vec::new();
    if let Some(abs) = rule.abs {
        parts.push(format!("abs {abs}"));
    }
    if let Some(rel) = rule.rel {
        parts.push(format!("rel {rel}"));
    }
    if let Some(days) = rule.days {
        parts.push(format!("{days} day(s)"));
    }
    if parts.is_empty() {
        "exact".into()
    } else {
        parts.join(" or ")
    }
}

fn bound<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn print_definition(config: &ReconTypeConfig) {
    println!("{} ({}) v{}", config.name, config.id, config.version);
    if !config.description.is_empty() {
        println!("  {}", config.description);
    }

    println!();
    println!("slots:");
    for slot in &config.slots {
        let required = if slot.required { "required" } else { "optional" };
        let accept = if slot.accept.is_empty() {
            String::new()
        } else {
            format!(" [{}]", slot.accept.join(" "))
        };
        println!(
            "  {:<16} {:<5} {:<8} {}{}",
            slot.name,
            slot.side.to_string(),
            required,
            slot.display_label(),
            accept
        );
    }

    println!();
    println!("fields:");
    for field in &config.fields {
        let mut notes = Vec::new();
        if field.mandatory {
            notes.push("mandatory".to_string());
        }
        if let Some(side) = field.side {
            notes.push(format!("{side} only"));
        }
        if !field.aliases.is_empty() {
            notes.push(format!("aliases: {}", field.aliases.join(", ")));
        }
        if let Some(ref text) = field.empty_as {
            notes.push(format!("empty as '{text}'"));
        }
        println!("  {:<20} {:<8} {}", field.name, field.kind.to_string(), notes.join("; "));
    }

    println!();
    if config.keys.is_empty() {
        println!("keys: (none, all records compete)");
    } else {
        println!("keys: {}", config.keys.join(", "));
    }

    let compared = config.compared_fields();
    if !compared.is_empty() {
        println!("compare:");
        for (name, weight) in compared {
            let tolerance = config
                .tolerance_for(name)
                .map(describe_tolerance)
                .unwrap_or_else(|| "exact".into());
            println!("  {:<20} weight {weight}, {tolerance}", name);
        }
    }

    if let Some(ref agg) = config.aggregate {
        let by = if agg.group_by.is_empty() {
            "whole table".to_string()
        } else {
            agg.group_by.join(", ")
        };
        println!("aggregate: {} side by {by}, sum {}", agg.side, agg.sum.join(", "));
    }

    if let Some(ref rate) = config.rate {
        let unit = if rate.percent { "%" } else { "" };
        println!(
            "rate: {} / {}{unit} on the {} side, {} decimals",
            rate.numerator, rate.denominator, rate.side, rate.decimals
        );
        if rate.expected_min.is_some() || rate.expected_max.is_some() {
            println!(
                "  expected: {} .. {}",
                bound(rate.expected_min),
                bound(rate.expected_max)
            );
        }
        if let Some(ref group) = rate.group_by {
            println!("  grouped by {group}");
        }
    }

    if !config.fees.is_empty() {
        println!("fees:");
        for fee in &config.fees {
            let rule = match settlerec_recon::fees::resolve_rule(&fee.rule) {
                Ok((formula, _)) => formula.describe(),
                Err(msg) => msg,
            };
            println!("  {:<20} {} side, {rule}", fee.name, fee.side);
        }
    }
}

pub fn cmd_show(registry: &Registry, type_id: &str, json: bool) -> Result<(), CliError> {
    let config = registry.resolve(type_id)?;
    if json {
        return print_json(config);
    }
    print_definition(config);
    Ok(())
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    engine_version: &'static str,
    types: Vec<&'a str>,
}

pub fn cmd_health(registry: &Registry, json: bool) -> Result<(), CliError> {
    let health = Health {
        status: "ok",
        engine_version: ENGINE_VERSION,
        types: registry.ids(),
    };
    if json {
        return print_json(&health);
    }
    println!("status:  {}", health.status);
    println!("engine:  settlerec {}", health.engine_version);
    println!("types:   {}", health.types.join(", "));
    Ok(())
}
