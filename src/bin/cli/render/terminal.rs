use scout_vault_lib::migration::{MigrationReport, RotationReport};
use scout_vault_lib::reports::ScoutingReport;

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
}

/// Wrap `text` in a color when colors are on
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Summary line plus one line per failed record
pub fn render_migration(report: &MigrationReport, use_color: bool) -> Vec<String> {
    let color = if report.is_complete() {
        Color::GREEN
    } else if report.failures.is_empty() {
        Color::YELLOW
    } else {
        Color::RED
    };
    let mut lines = vec![paint(&report.summary(), color, use_color)];

    for failure in &report.failures {
        lines.push(format!(
            "  {} {}",
            paint(&failure.id, Color::BOLD, use_color),
            paint(&failure.reason.to_string(), Color::DIM, use_color)
        ));
    }
    if report.looks_like_wrong_key() {
        lines.push(paint(
            "Every record failed to decrypt: the key is almost certainly wrong.",
            Color::RED,
            use_color,
        ));
    }
    lines
}

pub fn render_rotation(rotation: &RotationReport, use_color: bool) -> Vec<String> {
    let mut lines = vec![paint("Decrypt under old password:", Color::BOLD, use_color)];
    lines.extend(render_migration(&rotation.unlock, use_color));
    match &rotation.lock {
        Some(lock) => {
            lines.push(paint("Encrypt under new password:", Color::BOLD, use_color));
            lines.extend(render_migration(lock, use_color));
        }
        None => lines.push(paint(
            "Rotation stopped; the old password is still in effect.",
            Color::YELLOW,
            use_color,
        )),
    }
    lines
}

/// Readable view of a (decrypted) report
pub fn render_report(report: &ScoutingReport, use_color: bool) -> Vec<String> {
    let s = &report.sensitive;
    let name = format!("{} {}", s.athlete_first_name, s.athlete_last_name);
    let mut lines = vec![paint(name.trim(), Color::BOLD, use_color)];

    let meta: Vec<&str> = [
        report.event_name.as_deref(),
        report.match_type.as_deref(),
        report.match_date.as_deref(),
        report.weight_class.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !meta.is_empty() {
        lines.push(paint(&meta.join(" | "), Color::DIM, use_color));
    }
    lines.push(String::new());

    let rows = [
        ("Club", s.athlete_club.clone()),
        ("Country", s.athlete_country.clone()),
        ("National rank", s.athlete_national_rank.clone()),
        ("International rank", s.athlete_international_rank.clone()),
        ("Grip", s.athlete_grip.clone()),
        ("Attacks", s.athlete_attacks.join(", ")),
        ("Videos", s.video_refs.join(", ")),
    ];
    for (label, value) in rows {
        if !value.is_empty() {
            lines.push(format!("{:<20}{}", format!("{}:", label), value));
        }
    }
    if !s.technique_notes.is_empty() {
        lines.push(String::new());
        lines.push(s.technique_notes.clone());
    }
    lines
}
