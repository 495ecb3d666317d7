use std::fmt::Write as _;

use affix_core::codec::{LoadReport, RecordStatus};
use affix_core::core_api::{AffixView, BagEntry, InstanceEntry, RuntimeEntry, Session};
use affix_core::layout::{SectionId, StreamLayout};
use affix_core::slots::InstanceAffixSlots;
use affix_core::store::CraftingState;
use affix_core::token::{AffixToken, InstanceKey, format_instance_key};
use serde_json::{Map as JsonMap, Value as JsonValue};

const LEDGER_WIDTH: usize = 76;
const KEY_COL_WIDTH: usize = 16;
const SLOT_COL_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    #[default]
    CanonicalV1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextStyle {
    #[default]
    Ledger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextRenderOptions {
    /// Include runtime counters, evaluated keys and record layout.
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldSelection {
    pub slots: bool,
    pub runtime: bool,
    pub evaluated: bool,
    pub crafting: bool,
    pub bags: bool,
    pub layout: bool,
}

impl FieldSelection {
    pub fn is_any_selected(&self) -> bool {
        self.slots || self.runtime || self.evaluated || self.crafting || self.bags || self.layout
    }
}

pub fn format_token(token: AffixToken) -> String {
    format!("0x{token:016X}")
}

pub fn render_json_full(session: &Session, style: JsonStyle) -> JsonValue {
    let all = FieldSelection {
        slots: true,
        runtime: true,
        evaluated: true,
        crafting: true,
        bags: true,
        layout: true,
    };
    render_json_selected(session, &all, style)
}

/// Summary and load report, then the selected sections in canonical order.
pub fn render_json_selected(
    session: &Session,
    fields: &FieldSelection,
    style: JsonStyle,
) -> JsonValue {
    match style {
        JsonStyle::CanonicalV1 => JsonValue::Object(selected_json(session, fields)),
    }
}

fn selected_json(session: &Session, fields: &FieldSelection) -> JsonMap<String, JsonValue> {
    let snapshot = session.snapshot();
    let mut out = JsonMap::new();

    out.insert("summary".to_string(), summary_to_json(session));
    if let Some(report) = session.last_load_report() {
        out.insert("load".to_string(), load_report_to_json(report));
    }
    if fields.slots {
        out.insert(
            "instances".to_string(),
            JsonValue::Array(snapshot.instances.iter().map(instance_to_json).collect()),
        );
    }
    if fields.runtime {
        out.insert(
            "runtime".to_string(),
            JsonValue::Array(snapshot.runtime.iter().map(runtime_to_json).collect()),
        );
    }
    if fields.evaluated {
        out.insert(
            "evaluated".to_string(),
            JsonValue::Array(
                snapshot
                    .evaluated
                    .iter()
                    .map(|&key| JsonValue::String(format_instance_key(key)))
                    .collect(),
            ),
        );
    }
    if fields.crafting {
        out.insert("crafting".to_string(), crafting_to_json(&snapshot.crafting));
    }
    if fields.bags {
        out.insert(
            "bags".to_string(),
            JsonValue::Array(snapshot.bags.iter().map(bag_to_json).collect()),
        );
    }
    if fields.layout
        && let Some(report) = session.last_load_report()
    {
        out.insert("layout".to_string(), layout_to_json(&report.layout));
    }
    out
}

fn summary_to_json(session: &Session) -> JsonValue {
    let summary = session.summary();
    let mut m = JsonMap::new();
    m.insert("instances".to_string(), JsonValue::from(summary.instances));
    m.insert("evaluated".to_string(), JsonValue::from(summary.evaluated));
    m.insert(
        "runtime_states".to_string(),
        JsonValue::from(summary.runtime_states),
    );
    m.insert(
        "catalog_affixes".to_string(),
        JsonValue::from(session.catalog().map_or(0, |c| c.len())),
    );
    JsonValue::Object(m)
}

pub fn load_report_to_json(report: &LoadReport) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "records".to_string(),
        JsonValue::Array(
            report
                .records
                .iter()
                .map(|r| {
                    let mut rec = JsonMap::new();
                    rec.insert("tag".to_string(), JsonValue::String(r.tag.clone()));
                    rec.insert("version".to_string(), JsonValue::from(r.version));
                    rec.insert("length".to_string(), JsonValue::from(r.length));
                    rec.insert(
                        "status".to_string(),
                        JsonValue::String(record_status_name(r.status).to_string()),
                    );
                    JsonValue::Object(rec)
                })
                .collect(),
        ),
    );
    m.insert("slots_loaded".to_string(), JsonValue::from(report.slots_loaded));
    m.insert(
        "runtime_states_loaded".to_string(),
        JsonValue::from(report.runtime_states_loaded),
    );
    m.insert(
        "evaluated_loaded".to_string(),
        JsonValue::from(report.evaluated_loaded),
    );
    m.insert("bags_loaded".to_string(), JsonValue::from(report.bags_loaded));
    m.insert(
        "migrated_versions".to_string(),
        JsonValue::Array(
            report
                .migrated_versions
                .iter()
                .map(|&v| JsonValue::from(v))
                .collect(),
        ),
    );
    m.insert(
        "unresolved_references".to_string(),
        JsonValue::from(report.unresolved_references),
    );
    m.insert(
        "evaluated_repaired".to_string(),
        JsonValue::from(report.evaluated_repaired),
    );
    m.insert(
        "bag_indices_dropped".to_string(),
        JsonValue::from(report.bag_indices_dropped),
    );
    m.insert(
        "corruption".to_string(),
        report
            .corruption
            .as_ref()
            .map_or(JsonValue::Null, |c| JsonValue::String(c.clone())),
    );
    JsonValue::Object(m)
}

fn record_status_name(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Applied => "applied",
        RecordStatus::Migrated => "migrated",
        RecordStatus::Skipped => "skipped",
        RecordStatus::Corrupted => "corrupted",
    }
}

fn affix_to_json(affix: &AffixView) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("token".to_string(), JsonValue::String(format_token(affix.token)));
    if let Some(id) = &affix.id {
        m.insert("id".to_string(), JsonValue::String(id.clone()));
    }
    if let Some(slot) = affix.slot {
        m.insert("slot".to_string(), JsonValue::String(slot.as_str().to_string()));
    }
    if let Some(label) = &affix.label {
        m.insert("label".to_string(), JsonValue::String(label.clone()));
    }
    JsonValue::Object(m)
}

fn instance_to_json(entry: &InstanceEntry) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "key".to_string(),
        JsonValue::String(format_instance_key(entry.key)),
    );
    m.insert(
        "base_form_id".to_string(),
        JsonValue::String(format!("{:08X}", entry.base_form_id)),
    );
    m.insert("unique_id".to_string(), JsonValue::from(entry.unique_id));
    m.insert(
        "affixes".to_string(),
        JsonValue::Array(entry.affixes.iter().map(affix_to_json).collect()),
    );
    JsonValue::Object(m)
}

fn runtime_to_json(entry: &RuntimeEntry) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "key".to_string(),
        JsonValue::String(format_instance_key(entry.key)),
    );
    m.insert("affix".to_string(), affix_to_json(&entry.affix));
    m.insert(
        "evolution_xp".to_string(),
        JsonValue::from(entry.state.evolution_xp),
    );
    m.insert(
        "mode_cycle_counter".to_string(),
        JsonValue::from(entry.state.mode_cycle_counter),
    );
    m.insert("mode_index".to_string(), JsonValue::from(entry.state.mode_index));
    JsonValue::Object(m)
}

fn crafting_to_json(crafting: &CraftingState) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "selected_base".to_string(),
        crafting
            .selected_base
            .map_or(JsonValue::Null, |k| JsonValue::String(format_instance_key(k))),
    );
    m.insert(
        "recipe_cursor".to_string(),
        JsonValue::from(crafting.recipe_cursor),
    );
    m.insert("base_cursor".to_string(), JsonValue::from(crafting.base_cursor));

    let mut fragments = JsonMap::new();
    for (&rune, &amount) in &crafting.fragments {
        fragments.insert(format_token(rune), JsonValue::from(amount));
    }
    m.insert("fragments".to_string(), JsonValue::Object(fragments));

    m.insert(
        "instances".to_string(),
        JsonValue::Array(
            crafting
                .instances
                .iter()
                .map(|(&key, state)| {
                    let mut inst = JsonMap::new();
                    inst.insert(
                        "key".to_string(),
                        JsonValue::String(format_instance_key(key)),
                    );
                    inst.insert(
                        "recipe".to_string(),
                        JsonValue::String(format_token(state.recipe_token)),
                    );
                    inst.insert(
                        "inserted_runes".to_string(),
                        JsonValue::from(state.inserted_runes),
                    );
                    JsonValue::Object(inst)
                })
                .collect(),
        ),
    );
    JsonValue::Object(m)
}

fn bag_to_json(bag: &BagEntry) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("pool".to_string(), JsonValue::String(bag.pool.as_str().to_string()));
    m.insert("cursor".to_string(), JsonValue::from(bag.cursor));
    m.insert(
        "order".to_string(),
        JsonValue::Array(bag.order.iter().map(|&i| JsonValue::from(i)).collect()),
    );
    JsonValue::Object(m)
}

fn section_name(id: SectionId) -> String {
    match id {
        SectionId::RecordHeader(tag) => format!("{}:header", tag_text(tag)),
        SectionId::RecordPayload(tag) => format!("{}:payload", tag_text(tag)),
        SectionId::Tail => "tail".to_string(),
    }
}

fn tag_text(tag: u32) -> String {
    affix_core::codec::types::record_tag_name(tag)
}

pub fn layout_to_json(layout: &StreamLayout) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("stream_len".to_string(), JsonValue::from(layout.stream_len));
    m.insert(
        "record_count".to_string(),
        JsonValue::from(layout.record_count()),
    );
    m.insert(
        "sections".to_string(),
        JsonValue::Array(
            layout
                .sections
                .iter()
                .map(|s| {
                    let mut sec = JsonMap::new();
                    sec.insert("name".to_string(), JsonValue::String(section_name(s.id)));
                    sec.insert("start".to_string(), JsonValue::from(s.range.start));
                    sec.insert("end".to_string(), JsonValue::from(s.range.end));
                    JsonValue::Object(sec)
                })
                .collect(),
        ),
    );
    JsonValue::Object(m)
}

/// JSON for a single previewed roll.
pub fn render_preview_json(session: &Session, key: InstanceKey, slots: &InstanceAffixSlots) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("key".to_string(), JsonValue::String(format_instance_key(key)));
    m.insert(
        "affixes".to_string(),
        JsonValue::Array(
            slots
                .iter()
                .map(|token| affix_to_json(&view_for(session, token)))
                .collect(),
        ),
    );
    JsonValue::Object(m)
}

fn view_for(session: &Session, token: AffixToken) -> AffixView {
    let definition = session.catalog().and_then(|c| c.by_token(token));
    AffixView {
        token,
        id: definition.map(|d| d.id.clone()),
        slot: definition.map(|d| d.slot),
        label: definition
            .map(|d| d.label.clone())
            .filter(|l| !l.is_empty()),
    }
}

pub fn render_text(session: &Session, style: TextStyle) -> String {
    render_text_with_options(session, style, TextRenderOptions::default())
}

pub fn render_text_with_options(
    session: &Session,
    style: TextStyle,
    options: TextRenderOptions,
) -> String {
    match style {
        TextStyle::Ledger => render_ledger_impl(session, options),
    }
}

fn affix_display(affix: &AffixView) -> String {
    match (&affix.label, &affix.id) {
        (Some(label), _) => label.clone(),
        (None, Some(id)) => id.clone(),
        (None, None) => format_token(affix.token),
    }
}

fn render_ledger_impl(session: &Session, options: TextRenderOptions) -> String {
    let snapshot = session.snapshot();
    let summary = session.summary();
    let mut out = String::new();

    writeln!(&mut out).expect("writing to String cannot fail");
    writeln!(&mut out, "{}", centered_no_trailing("AFFIX LEDGER", LEDGER_WIDTH))
        .expect("writing to String cannot fail");
    writeln!(
        &mut out,
        "{}",
        centered_no_trailing(
            &format!(
                "{} instances  {} evaluated  {} runtime states",
                summary.instances, summary.evaluated, summary.runtime_states
            ),
            LEDGER_WIDTH
        )
    )
    .expect("writing to String cannot fail");
    writeln!(&mut out).expect("writing to String cannot fail");

    if let Some(report) = session.last_load_report() {
        write_load_section(&mut out, report);
    }

    writeln!(&mut out, " ::: Instances :::").expect("writing to String cannot fail");
    if snapshot.instances.is_empty() {
        writeln!(&mut out, "   (none)").expect("writing to String cannot fail");
    }
    for entry in &snapshot.instances {
        for (i, affix) in entry.affixes.iter().enumerate() {
            let key = if i == 0 {
                format_instance_key(entry.key)
            } else {
                String::new()
            };
            let slot = affix.slot.map_or("?", |s| s.as_str());
            writeln!(
                &mut out,
                "   {:<kw$}{:<sw$}{}",
                key,
                slot,
                affix_display(affix),
                kw = KEY_COL_WIDTH,
                sw = SLOT_COL_WIDTH,
            )
            .expect("writing to String cannot fail");
        }
    }
    writeln!(&mut out).expect("writing to String cannot fail");

    let crafting = &snapshot.crafting;
    if crafting.selected_base.is_some() || !crafting.instances.is_empty() || !crafting.fragments.is_empty() {
        writeln!(&mut out, " ::: Runewords :::").expect("writing to String cannot fail");
        if let Some(base) = crafting.selected_base {
            writeln!(&mut out, "   Selected base: {}", format_instance_key(base))
                .expect("writing to String cannot fail");
        }
        for (&key, state) in &crafting.instances {
            writeln!(
                &mut out,
                "   {:<kw$}{} runes  {}",
                format_instance_key(key),
                state.inserted_runes,
                format_token(state.recipe_token),
                kw = KEY_COL_WIDTH,
            )
            .expect("writing to String cannot fail");
        }
        for (&rune, &amount) in &crafting.fragments {
            writeln!(&mut out, "   Fragments {}: {}", format_token(rune), amount)
                .expect("writing to String cannot fail");
        }
        writeln!(&mut out).expect("writing to String cannot fail");
    }

    if options.verbose {
        writeln!(&mut out, " ::: Runtime :::").expect("writing to String cannot fail");
        for entry in &snapshot.runtime {
            writeln!(
                &mut out,
                "   {:<kw$}{:<24} xp {:>6}  mode {} ({})",
                format_instance_key(entry.key),
                affix_display(&entry.affix),
                entry.state.evolution_xp,
                entry.state.mode_index,
                entry.state.mode_cycle_counter,
                kw = KEY_COL_WIDTH,
            )
            .expect("writing to String cannot fail");
        }
        writeln!(&mut out).expect("writing to String cannot fail");

        writeln!(&mut out, " ::: Shuffle Bags :::").expect("writing to String cannot fail");
        for bag in &snapshot.bags {
            writeln!(
                &mut out,
                "   {:<16}{}/{}",
                bag.pool.as_str(),
                bag.cursor,
                bag.order.len()
            )
            .expect("writing to String cannot fail");
        }
        writeln!(&mut out).expect("writing to String cannot fail");
    }

    out
}

fn write_load_section(out: &mut String, report: &LoadReport) {
    writeln!(out, " ::: Records :::").expect("writing to String cannot fail");
    for record in &report.records {
        writeln!(
            out,
            "   {:<6}v{:<4}{:>8} bytes  {}",
            record.tag,
            record.version,
            record.length,
            record_status_name(record.status)
        )
        .expect("writing to String cannot fail");
    }
    if let Some(reason) = &report.corruption {
        writeln!(out, "   CORRUPT: {reason}").expect("writing to String cannot fail");
    }
    if report.unresolved_references > 0 {
        writeln!(
            out,
            "   Dropped {} unresolved references",
            report.unresolved_references
        )
        .expect("writing to String cannot fail");
    }
    writeln!(out).expect("writing to String cannot fail");
}

fn centered_no_trailing(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let pad = (width - len) / 2;
    format!("{}{}", " ".repeat(pad), text)
}
