//! Console presentation of match events

use shared::{ColorToken, MatchEvent, Position};

/// Prints what the match layer reports to the terminal
pub struct Hud {
    last_countdown: Option<u32>,
}

impl Hud {
    pub fn new() -> Self {
        Self {
            last_countdown: None,
        }
    }

    /// One-line description of an event, or `None` for events with nothing
    /// to show
    pub fn describe(event: &MatchEvent) -> Option<String> {
        let text = match event {
            MatchEvent::RosterChanged => return None,
            MatchEvent::Started => "Match started".to_string(),
            MatchEvent::SpawnLocal { position, color } => {
                format!("Spawned at {} as {}", format_position(position), label(*color))
            }
            MatchEvent::ScoreChanged { id, score } => {
                format!("Participant {} has {} points", id, score)
            }
            MatchEvent::ScorePopup { delta } => format!("{:+}", delta),
            MatchEvent::Ended => "Match over".to_string(),
            MatchEvent::DespawnAll => "Avatars cleared".to_string(),
        };
        Some(text)
    }

    pub fn report(&mut self, events: &[MatchEvent]) {
        for event in events {
            if matches!(event, MatchEvent::Started | MatchEvent::Ended) {
                self.last_countdown = None;
            }
            if let Some(text) = Self::describe(event) {
                println!("{}", text);
            }
        }
    }

    /// Announces the remaining round time once per whole second, every five
    /// seconds until the last five
    pub fn countdown(&mut self, remaining: f32, running: bool) -> Option<String> {
        if !running {
            self.last_countdown = None;
            return None;
        }

        let seconds = remaining.max(0.0).ceil() as u32;
        if self.last_countdown == Some(seconds) || seconds == 0 {
            return None;
        }
        self.last_countdown = Some(seconds);

        (seconds <= 5 || seconds % 5 == 0).then(|| format!("{}s left", seconds))
    }

    pub fn roster(lines: &[String]) {
        if lines.is_empty() {
            println!("(nobody in the room)");
        }
        for line in lines {
            println!("  {}", line);
        }
    }
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

fn format_position(position: &Position) -> String {
    format!("({:.1}, {:.1}, {:.1})", position.x, position.y, position.z)
}

fn label(color: Option<ColorToken>) -> String {
    match color {
        Some(color) => format!("{} {:?}", swatch(color), color),
        None => "no color".to_string(),
    }
}

/// Truecolor block in the token's color
pub fn swatch(color: ColorToken) -> String {
    let (r, g, b) = color.rgb();
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "\x1b[38;2;{};{};{}m\u{25a0}\x1b[0m",
        channel(r),
        channel(g),
        channel(b)
    )
}
