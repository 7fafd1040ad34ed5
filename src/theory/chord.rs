use super::{NoteEvent, TheoryError, TheoryResult};

const MAX_PREALLOCATED: usize = 4096;

/// A parsed chord symbol such as `Am7`, `Cmaj7`, or `Em/G`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordSymbol {
    /// Pitch class of the root, 0 = C.
    pub root: u8,
    /// Semitone offsets from the root, ascending and unique.
    pub intervals: Vec<u8>,
    /// Pitch class of a slash bass note.
    pub bass: Option<u8>,
}

impl ChordSymbol {
    /// Parse a chord symbol.
    pub fn parse(symbol: &str) -> TheoryResult<Self> {
        let trimmed = symbol.trim();
        let (body, bass) = match trimmed.split_once('/') {
            Some((body, bass)) => (body.trim(), Some(bass.trim())),
            None => (trimmed, None),
        };

        let (root, rest) = parse_root(body).ok_or_else(|| invalid(symbol, "missing or invalid root"))?;
        let bass = match bass {
            Some(text) => match parse_root(text) {
                Some((pc, "")) => Some(pc),
                _ => return Err(invalid(symbol, "invalid bass note")),
            },
            None => None,
        };

        let (triad, mut rest) = parse_quality(rest);
        let mut intervals: Vec<u8> = triad.to_vec();
        while !rest.is_empty() {
            let (interval, consumed) =
                parse_extension(rest).ok_or_else(|| invalid(symbol, &format!("unknown extension '{rest}'")))?;
            if let Some(interval) = interval {
                intervals.push(interval);
            }
            rest = &rest[consumed..];
        }
        intervals.sort_unstable();
        intervals.dedup();

        Ok(Self {
            root,
            intervals,
            bass,
        })
    }

    /// MIDI pitches at the given octave (`C4 = 48`). Out-of-range pitches are
    /// dropped; a slash bass sounds one octave below and comes first.
    pub fn pitches(&self, octave: i32) -> Vec<u8> {
        let base = octave * 12 + i32::from(self.root);
        let mut pitches: Vec<u8> = self
            .intervals
            .iter()
            .filter_map(|interval| midi(base + i32::from(*interval)))
            .collect();
        if let Some(bass) = self.bass {
            if let Some(pitch) = midi((octave - 1) * 12 + i32::from(bass)) {
                pitches.insert(0, pitch);
            }
        }
        pitches
    }
}

/// Resolve a chord symbol to MIDI pitches.
pub fn resolve_symbol_to_pitches(symbol: &str, octave: i32) -> TheoryResult<Vec<u8>> {
    let pitches = ChordSymbol::parse(symbol)?.pitches(octave);
    if pitches.is_empty() {
        return Err(TheoryError::NoPitches {
            symbol: symbol.to_string(),
            octave,
        });
    }
    Ok(pitches)
}

fn midi(value: i32) -> Option<u8> {
    u8::try_from(value).ok().filter(|pitch| *pitch <= 127)
}

fn invalid(symbol: &str, reason: &str) -> TheoryError {
    TheoryError::InvalidSymbol {
        symbol: symbol.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_root(text: &str) -> Option<(u8, &str)> {
    let mut chars = text.char_indices();
    let (_, letter) = chars.next()?;
    let natural: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let (offset, consumed) = match text[1..].chars().next() {
        Some('#') => (1, 2),
        Some('b') => (-1, 2),
        _ => (0, 1),
    };
    let pc = (natural + offset).rem_euclid(12) as u8;
    Some((pc, &text[consumed..]))
}

fn parse_quality(rest: &str) -> (&'static [u8], &str) {
    const MAJOR: &[u8] = &[0, 4, 7];
    const MINOR: &[u8] = &[0, 3, 7];
    if rest.starts_with("maj") {
        return (MAJOR, rest);
    }
    for (prefix, triad) in [
        ("min", MINOR),
        ("dim", &[0, 3, 6][..]),
        ("aug", &[0, 4, 8][..]),
        ("sus2", &[0, 2, 7][..]),
        ("sus4", &[0, 5, 7][..]),
        ("m", MINOR),
        ("+", &[0, 4, 8][..]),
    ] {
        if let Some(tail) = rest.strip_prefix(prefix) {
            return (triad, tail);
        }
    }
    (MAJOR, rest)
}

/// Returns the interval added (if any) and the number of bytes consumed.
fn parse_extension(rest: &str) -> Option<(Option<u8>, usize)> {
    const TABLE: &[(&str, Option<u8>)] = &[
        ("maj7", Some(11)),
        ("maj9", Some(14)),
        ("maj", None),
        ("add9", Some(14)),
        ("add11", Some(17)),
        ("add13", Some(21)),
        ("13", Some(21)),
        ("11", Some(17)),
        ("9", Some(14)),
        ("7", Some(10)),
        ("6", Some(9)),
    ];
    TABLE
        .iter()
        .find(|(token, _)| rest.starts_with(token))
        .map(|(token, interval)| (*interval, token.len()))
}

/// Order in which arpeggio notes are played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpeggioDirection {
    /// Low to high.
    #[default]
    Up,
    /// High to low.
    Down,
    /// Low to high, then back down without repeating the ends.
    UpDown,
}

impl ArpeggioDirection {
    /// Parse `up`, `down`, or `updown`.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "updown" | "up_down" => Some(Self::UpDown),
            _ => None,
        }
    }

    fn order(self, pitches: &[u8]) -> Vec<u8> {
        match self {
            Self::Up => pitches.to_vec(),
            Self::Down => pitches.iter().rev().copied().collect(),
            Self::UpDown => {
                let mut ordered = pitches.to_vec();
                if pitches.len() > 2 {
                    ordered.extend(pitches[1..pitches.len() - 1].iter().rev());
                }
                ordered
            }
        }
    }
}

/// Timing and dynamics shared by the note layouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteShape {
    /// Beats covered by one repetition.
    pub length: f64,
    /// Number of repetitions.
    pub repeat: usize,
    /// MIDI velocity.
    pub velocity: u8,
    /// Beat at which the first note starts.
    pub start: f64,
}

/// Sequential notes; each repetition spans `length` unless `note_duration`
/// fixes the step.
pub fn arpeggio_events(
    pitches: &[u8],
    direction: ArpeggioDirection,
    note_duration: Option<f64>,
    shape: NoteShape,
) -> Vec<NoteEvent> {
    let ordered = direction.order(pitches);
    if ordered.is_empty() {
        return Vec::new();
    }
    let step = note_duration
        .filter(|duration| *duration > 0.0)
        .unwrap_or(shape.length / ordered.len() as f64);
    let mut beat = shape.start;
    let mut events = Vec::with_capacity(ordered.len().saturating_mul(shape.repeat).min(MAX_PREALLOCATED));
    for _ in 0..shape.repeat {
        for pitch in &ordered {
            events.push(NoteEvent {
                pitch: *pitch,
                velocity: shape.velocity,
                start: beat,
                duration: step,
            });
            beat += step;
        }
    }
    events
}

/// Simultaneous notes held for `length`, repeated back to back.
pub fn block_chord_events(pitches: &[u8], shape: NoteShape) -> Vec<NoteEvent> {
    let mut events = Vec::with_capacity(pitches.len().saturating_mul(shape.repeat).min(MAX_PREALLOCATED));
    for rep in 0..shape.repeat {
        let start = shape.start + rep as f64 * shape.length;
        events.extend(pitches.iter().map(|pitch| NoteEvent {
            pitch: *pitch,
            velocity: shape.velocity,
            start,
            duration: shape.length,
        }));
    }
    events
}

/// Chords sharing `length` evenly, repeated back to back.
pub fn progression_events(chords: &[Vec<u8>], shape: NoteShape) -> Vec<NoteEvent> {
    if chords.is_empty() {
        return Vec::new();
    }
    let per_chord = shape.length / chords.len() as f64;
    let mut beat = shape.start;
    let mut events = Vec::new();
    for _ in 0..shape.repeat {
        for pitches in chords {
            events.extend(pitches.iter().map(|pitch| NoteEvent {
                pitch: *pitch,
                velocity: shape.velocity,
                start: beat,
                duration: per_chord,
            }));
            beat += per_chord;
        }
    }
    events
}

/// Raise the lowest chord tone by an octave `inversion` times.
pub fn invert(pitches: &[u8], inversion: usize) -> Vec<u8> {
    let mut voiced = pitches.to_vec();
    for _ in 0..inversion.min(voiced.len()) {
        let lowest = voiced.remove(0);
        match lowest.checked_add(12).filter(|pitch| *pitch <= 127) {
            Some(raised) => voiced.push(raised),
            None => {
                voiced.insert(0, lowest);
                break;
            }
        }
    }
    voiced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_symbols() {
        assert_eq!(resolve_symbol_to_pitches("C", 4).expect("C"), vec![48, 52, 55]);
        assert_eq!(resolve_symbol_to_pitches("Em", 4).expect("Em"), vec![52, 55, 59]);
        assert_eq!(resolve_symbol_to_pitches("Am", 4).expect("Am"), vec![57, 60, 64]);
        assert_eq!(resolve_symbol_to_pitches("Am7", 4).expect("Am7"), vec![57, 60, 64, 67]);
        assert_eq!(resolve_symbol_to_pitches("Cmaj7", 4).expect("Cmaj7"), vec![48, 52, 55, 59]);
    }

    #[test]
    fn min_spelling_is_minor() {
        assert_eq!(
            resolve_symbol_to_pitches("Emin", 4).expect("Emin"),
            resolve_symbol_to_pitches("Em", 4).expect("Em")
        );
    }

    #[test]
    fn qualities_and_accidentals() {
        assert_eq!(resolve_symbol_to_pitches("Bdim", 3).expect("Bdim"), vec![47, 50, 53]);
        assert_eq!(resolve_symbol_to_pitches("Caug", 4).expect("Caug"), vec![48, 52, 56]);
        assert_eq!(resolve_symbol_to_pitches("Dsus4", 4).expect("Dsus4"), vec![50, 55, 57]);
        assert_eq!(resolve_symbol_to_pitches("F#m", 4).expect("F#m"), vec![54, 57, 61]);
        assert_eq!(resolve_symbol_to_pitches("Bb", 4).expect("Bb"), vec![58, 62, 65]);
        assert_eq!(resolve_symbol_to_pitches("Cadd9", 4).expect("Cadd9"), vec![48, 52, 55, 62]);
    }

    #[test]
    fn slash_bass_is_prepended_an_octave_down() {
        assert_eq!(resolve_symbol_to_pitches("Em/G", 4).expect("Em/G"), vec![43, 52, 55, 59]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            resolve_symbol_to_pitches("H7", 4),
            Err(TheoryError::InvalidSymbol { .. })
        ));
        assert!(matches!(
            resolve_symbol_to_pitches("Cxyz", 4),
            Err(TheoryError::InvalidSymbol { .. })
        ));
    }

    #[test]
    fn out_of_range_octave_has_no_pitches() {
        assert!(matches!(
            resolve_symbol_to_pitches("C", 12),
            Err(TheoryError::NoPitches { .. })
        ));
    }

    #[test]
    fn arpeggio_splits_length_across_notes() {
        let shape = NoteShape {
            length: 3.0,
            repeat: 2,
            velocity: 90,
            start: 1.0,
        };
        let events = arpeggio_events(&[48, 52, 55], ArpeggioDirection::Down, None, shape);
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].pitch, 55);
        assert_eq!(events[0].start, 1.0);
        assert_eq!(events[5].start, 6.0);
        assert!(events.iter().all(|e| e.duration == 1.0));
    }

    #[test]
    fn updown_does_not_repeat_the_ends() {
        assert_eq!(ArpeggioDirection::UpDown.order(&[1, 2, 3, 4]), vec![1, 2, 3, 4, 3, 2]);
    }

    #[test]
    fn progression_divides_length_per_chord() {
        let shape = NoteShape {
            length: 8.0,
            repeat: 1,
            velocity: 100,
            start: 0.0,
        };
        let events = progression_events(&[vec![48, 52, 55], vec![57, 60, 64]], shape);
        assert_eq!(events.len(), 6);
        assert_eq!(events[3].start, 4.0);
        assert_eq!(events[3].duration, 4.0);
    }

    #[test]
    fn inversion_raises_lowest_tone() {
        assert_eq!(invert(&[48, 52, 55], 1), vec![52, 55, 60]);
        assert_eq!(invert(&[48, 52, 55], 2), vec![55, 60, 64]);
    }
}
