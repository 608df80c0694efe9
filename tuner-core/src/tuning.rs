//! # Musical Tuning Module
//!
//! Maps frequencies to named notes and measures how far a pitch sits from
//! its note. The resolver is a trait so the analyzer can be driven by any
//! reference table; the built-in [`EqualTemperament`] covers the MIDI range
//! (C-1 to G9) around a configurable A4.
//!
//! ## Features
//! - Twelve-tone equal temperament with adjustable reference pitch
//! - Sharp or flat note spelling
//! - Cent deviation and normalized tune score

use serde::{Deserialize, Serialize};

/// Width of the tune-score window on either side of a note, in cents.
pub const SCORE_WINDOW_CENTS: f64 = 50.0;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const FLAT_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// MIDI note number of A4.
const A4_MIDI: i32 = 69;
const LOWEST_MIDI: i32 = 0;
const HIGHEST_MIDI: i32 = 127;

/// A named note together with its canonical frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    /// Note name with octave (e.g., "A4", "C#3", "Bb2")
    pub name: String,
    /// Canonical frequency in Hz
    pub frequency: f64,
}

/// How accidentals are written in note names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSpelling {
    Sharps,
    #[default]
    Flats,
}

/// Resolves frequencies to notes and notes back to their canonical frequency.
///
/// Both lookups return `None` when the input is outside what the resolver
/// supports; callers treat that as "no reading" rather than a failure.
pub trait NoteResolver: Send + Sync {
    /// Name of the note nearest to `freq`.
    fn nearest_note(&self, freq: f64) -> Option<String>;

    /// Canonical frequency of the note called `name`.
    fn note_frequency(&self, name: &str) -> Option<f64>;

    /// Resolves `freq` to its nearest note and that note's frequency in one step.
    fn resolve(&self, freq: f64) -> Option<Note> {
        let name = self.nearest_note(freq)?;
        let frequency = self.note_frequency(&name)?;
        Some(Note { name, frequency })
    }
}

/// Twelve-tone equal temperament anchored on a reference A4.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualTemperament {
    reference_hz: f64,
    spelling: NoteSpelling,
}

impl Default for EqualTemperament {
    fn default() -> Self {
        Self::new(440.0, NoteSpelling::default())
    }
}

impl EqualTemperament {
    pub fn new(reference_hz: f64, spelling: NoteSpelling) -> Self {
        Self { reference_hz, spelling }
    }

    pub fn reference_hz(&self) -> f64 {
        self.reference_hz
    }

    /// Frequency of a MIDI note number: `f = ref * 2^((n - 69) / 12)`.
    pub fn midi_to_frequency(&self, midi: i32) -> f64 {
        self.reference_hz * 2.0_f64.powf((midi - A4_MIDI) as f64 / 12.0)
    }

    /// Nearest MIDI note number for `freq`, if it lies in the supported range.
    pub fn frequency_to_midi(&self, freq: f64) -> Option<i32> {
        if !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let midi = (A4_MIDI as f64 + 12.0 * (freq / self.reference_hz).log2()).round();
        if !midi.is_finite() || midi < LOWEST_MIDI as f64 || midi > HIGHEST_MIDI as f64 {
            return None;
        }
        Some(midi as i32)
    }

    fn midi_to_name(&self, midi: i32) -> String {
        let names = match self.spelling {
            NoteSpelling::Sharps => &SHARP_NAMES,
            NoteSpelling::Flats => &FLAT_NAMES,
        };
        // The octave number changes at C.
        let octave = midi.div_euclid(12) - 1;
        format!("{}{}", names[midi.rem_euclid(12) as usize], octave)
    }
}

impl NoteResolver for EqualTemperament {
    fn nearest_note(&self, freq: f64) -> Option<String> {
        self.frequency_to_midi(freq).map(|midi| self.midi_to_name(midi))
    }

    fn note_frequency(&self, name: &str) -> Option<f64> {
        let midi = parse_note_name(name)?;
        if !(LOWEST_MIDI..=HIGHEST_MIDI).contains(&midi) {
            return None;
        }
        Some(self.midi_to_frequency(midi))
    }
}

/// Parses names like "A4", "C#3", "Bb2" or "C-1" into a MIDI note number.
///
/// Either spelling is accepted regardless of the resolver's own spelling.
pub fn parse_note_name(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let mut pitch_class: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let octave_start = rest
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(rest.len());
    let (accidentals, octave) = rest.split_at(octave_start);
    for accidental in accidentals.chars() {
        match accidental {
            '#' => pitch_class += 1,
            'b' => pitch_class -= 1,
            _ => return None,
        }
    }

    let octave: i32 = octave.parse().ok()?;
    octave.checked_add(1)?.checked_mul(12)?.checked_add(pitch_class)
}

/// Calculates the deviation of `freq` from `target_freq` in cents.
///
/// 100 cents = 1 semitone, 1200 cents = 1 octave.
/// Positive values are sharp, negative values are flat.
pub fn calculate_cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// Normalized closeness to a note: 1 at 0 cents, 0 at ±50 cents.
///
/// Not clamped; beyond ±50 cents the score is negative.
pub fn tune_score(cents_off: f64) -> f64 {
    1.0 - (cents_off / SCORE_WINDOW_CENTS).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a440_resolves_to_a4() {
        let et = EqualTemperament::default();
        let note = et.resolve(440.0).unwrap();
        assert_eq!(note.name, "A4");
        assert_eq!(note.frequency, 440.0);
    }

    #[test]
    fn nearby_frequency_snaps_to_nearest_note() {
        let et = EqualTemperament::default();
        assert_eq!(et.nearest_note(445.0).as_deref(), Some("A4"));
        assert_eq!(et.nearest_note(261.0).as_deref(), Some("C4"));
        assert_eq!(et.nearest_note(82.5).as_deref(), Some("E2"));
    }

    #[test]
    fn spelling_controls_accidentals() {
        let flats = EqualTemperament::new(440.0, NoteSpelling::Flats);
        let sharps = EqualTemperament::new(440.0, NoteSpelling::Sharps);
        assert_eq!(flats.nearest_note(466.16).as_deref(), Some("Bb4"));
        assert_eq!(sharps.nearest_note(466.16).as_deref(), Some("A#4"));
    }

    #[test]
    fn both_spellings_parse_to_the_same_note() {
        assert_eq!(parse_note_name("Bb4"), parse_note_name("A#4"));
        assert_eq!(parse_note_name("C-1"), Some(0));
        assert_eq!(parse_note_name("A4"), Some(69));
        assert_eq!(parse_note_name("H2"), None);
        assert_eq!(parse_note_name("A"), None);
        assert_eq!(parse_note_name("A2147483647"), None);
        assert_eq!(parse_note_name("C-2147483648"), None);
    }

    #[test]
    fn absurd_octaves_have_no_frequency() {
        let et = EqualTemperament::default();
        assert_eq!(et.note_frequency("A2147483647"), None);
        assert_eq!(et.note_frequency("A99"), None);
    }

    #[test]
    fn reference_pitch_shifts_the_table() {
        let et = EqualTemperament::new(442.0, NoteSpelling::Sharps);
        assert_eq!(et.note_frequency("A4"), Some(442.0));
        assert!((et.note_frequency("A5").unwrap() - 884.0).abs() < 1e-9);
    }

    #[test]
    fn unresolvable_frequencies_return_none() {
        let et = EqualTemperament::default();
        assert_eq!(et.resolve(0.0), None);
        assert_eq!(et.resolve(-10.0), None);
        assert_eq!(et.resolve(f64::NAN), None);
        assert_eq!(et.resolve(1.0), None);
        assert_eq!(et.resolve(50_000.0), None);
    }

    #[test]
    fn cents_and_score() {
        assert_eq!(calculate_cents_deviation(440.0, 440.0), 0.0);
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-9);
        let cents = calculate_cents_deviation(445.0, 440.0);
        assert!((cents - 19.56).abs() < 0.01);
        assert!((tune_score(cents) - 0.609).abs() < 0.001);
        assert_eq!(tune_score(0.0), 1.0);
        assert_eq!(tune_score(-50.0), 0.0);
        assert_eq!(tune_score(100.0), -1.0);
    }
}
