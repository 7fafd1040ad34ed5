use super::{NoteEvent, TheoryError, TheoryResult};

/// Canonical drum names mapped to General MIDI percussion notes.
pub const DRUM_MAP: &[(&str, u8)] = &[
    ("kick", 36),
    ("snare", 38),
    ("snare_rim", 40),
    ("snare_xstick", 37),
    ("hat", 42),
    ("hat_open", 46),
    ("hat_pedal", 44),
    ("tom_high", 50),
    ("tom_mid", 47),
    ("tom_low", 45),
    ("crash", 49),
    ("ride", 51),
    ("ride_bell", 53),
    ("china", 52),
    ("splash", 55),
    ("cowbell", 56),
    ("tambourine", 54),
    ("clap", 39),
    ("snap", 43),
    ("shaker", 82),
    ("conga_high", 62),
    ("conga_low", 63),
    ("bongo_high", 60),
    ("bongo_low", 61),
];

/// Velocity of a ghost (`o`) hit.
pub const GHOST_VELOCITY: u8 = 60;
/// Velocity of an accented (`X`) hit.
pub const ACCENT_VELOCITY: u8 = 127;

/// MIDI note for a canonical drum name.
pub fn drum_note(name: &str) -> Option<u8> {
    DRUM_MAP
        .iter()
        .find(|(drum, _)| *drum == name)
        .map(|(_, note)| *note)
}

/// Grid timing for a beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSettings {
    /// Grid steps per 4/4 bar.
    pub subdivision: u32,
    /// Swing amount, 0-100; delays odd steps by up to half a step.
    pub swing: f64,
    /// Bars over which a one-bar grid repeats.
    pub bars: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            subdivision: 16,
            swing: 0.0,
            bars: 1,
        }
    }
}

impl GridSettings {
    /// Length of one grid step in beats.
    pub fn step(&self) -> f64 {
        4.0 / f64::from(self.subdivision.max(1))
    }
}

/// Check a grid string for characters outside `x X o -` and space.
pub fn validate_grid(grid: &str) -> TheoryResult<()> {
    match grid.chars().find(|ch| !matches!(ch, 'x' | 'X' | 'o' | '-' | ' ')) {
        Some(ch) => Err(TheoryError::InvalidGrid {
            grid: grid.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

/// Lay a grid out as notes. Spaces are ignored; `-` is a rest. A grid no
/// longer than one bar repeats once per bar.
pub fn grid_events(
    grid: &str,
    pitch: u8,
    velocity: u8,
    settings: GridSettings,
) -> TheoryResult<Vec<NoteEvent>> {
    validate_grid(grid)?;
    let steps: Vec<char> = grid.chars().filter(|ch| *ch != ' ').collect();
    let step = settings.step();
    let swing_offset = settings.swing.clamp(0.0, 100.0) / 100.0 * step * 0.5;
    let repeats = if steps.len() as u32 <= settings.subdivision {
        settings.bars.max(1)
    } else {
        1
    };

    let mut events = Vec::new();
    for bar in 0..repeats {
        let bar_start = f64::from(bar) * 4.0;
        for (index, ch) in steps.iter().enumerate() {
            let hit = match ch {
                'x' => velocity,
                'X' => ACCENT_VELOCITY,
                'o' => GHOST_VELOCITY,
                _ => continue,
            };
            let swing = if index % 2 == 1 { swing_offset } else { 0.0 };
            events.push(NoteEvent {
                pitch,
                velocity: hit,
                start: bar_start + index as f64 * step + swing,
                duration: step * 0.9,
            });
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gm_notes() {
        assert_eq!(drum_note("kick"), Some(36));
        assert_eq!(drum_note("snare"), Some(38));
        assert_eq!(drum_note("hat"), Some(42));
        assert_eq!(drum_note("shaker"), Some(82));
        assert_eq!(drum_note("cymbal"), None);
    }

    #[test]
    fn four_on_the_floor() {
        let events = grid_events("x---x---x---x---", 36, 100, GridSettings::default()).expect("grid");
        let starts: Vec<f64> = events.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0]);
        assert!(events.iter().all(|e| e.velocity == 100 && (e.duration - 0.225).abs() < 1e-9));
    }

    #[test]
    fn accents_and_ghosts() {
        let events = grid_events("X-o-", 38, 90, GridSettings::default()).expect("grid");
        assert_eq!(events[0].velocity, 127);
        assert_eq!(events[1].velocity, 60);
    }

    #[test]
    fn one_bar_grid_repeats_over_bars() {
        let settings = GridSettings {
            bars: 2,
            ..GridSettings::default()
        };
        let events = grid_events("x--- ---- ---- ----", 36, 100, settings).expect("grid");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].start, 4.0);
    }

    #[test]
    fn swing_delays_odd_steps() {
        let settings = GridSettings {
            swing: 50.0,
            ..GridSettings::default()
        };
        let events = grid_events("xx", 42, 100, settings).expect("grid");
        assert_eq!(events[0].start, 0.0);
        assert!((events[1].start - (0.25 + 0.0625)).abs() < 1e-9);
    }

    #[test]
    fn rejects_unknown_characters() {
        assert_eq!(
            validate_grid("x-y-"),
            Err(TheoryError::InvalidGrid {
                grid: "x-y-".into(),
                ch: 'y'
            })
        );
    }
}
