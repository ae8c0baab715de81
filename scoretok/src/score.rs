// In-memory symbolic score.
//
// The score is what tokenizers read from and decode into: tracks of notes,
// sustain pedals and pitch bends, plus score-wide tempo and time-signature
// changes, all in ticks at `ticks_per_beat`. Encoding never mutates a score;
// decoding always builds a fresh one.

use serde::{Deserialize, Serialize};

/// General MIDI program names, indexed by program number.
pub const GM_PROGRAM_NAMES: [&str; 128] = [
    "Acoustic Grand Piano",
    "Bright Acoustic Piano",
    "Electric Grand Piano",
    "Honky-tonk Piano",
    "Electric Piano 1",
    "Electric Piano 2",
    "Harpsichord",
    "Clavi",
    "Celesta",
    "Glockenspiel",
    "Music Box",
    "Vibraphone",
    "Marimba",
    "Xylophone",
    "Tubular Bells",
    "Dulcimer",
    "Drawbar Organ",
    "Percussive Organ",
    "Rock Organ",
    "Church Organ",
    "Reed Organ",
    "Accordion",
    "Harmonica",
    "Tango Accordion",
    "Acoustic Guitar (nylon)",
    "Acoustic Guitar (steel)",
    "Electric Guitar (jazz)",
    "Electric Guitar (clean)",
    "Electric Guitar (muted)",
    "Overdriven Guitar",
    "Distortion Guitar",
    "Guitar Harmonics",
    "Acoustic Bass",
    "Electric Bass (finger)",
    "Electric Bass (pick)",
    "Fretless Bass",
    "Slap Bass 1",
    "Slap Bass 2",
    "Synth Bass 1",
    "Synth Bass 2",
    "Violin",
    "Viola",
    "Cello",
    "Contrabass",
    "Tremolo Strings",
    "Pizzicato Strings",
    "Orchestral Harp",
    "Timpani",
    "String Ensembles 1",
    "String Ensembles 2",
    "SynthStrings 1",
    "SynthStrings 2",
    "Choir Aahs",
    "Voice Oohs",
    "Synth Voice",
    "Orchestra Hit",
    "Trumpet",
    "Trombone",
    "Tuba",
    "Muted Trumpet",
    "French Horn",
    "Brass Section",
    "Synth Brass 1",
    "Synth Brass 2",
    "Soprano Sax",
    "Alto Sax",
    "Tenor Sax",
    "Baritone Sax",
    "Oboe",
    "English Horn",
    "Bassoon",
    "Clarinet",
    "Piccolo",
    "Flute",
    "Recorder",
    "Pan Flute",
    "Blown Bottle",
    "Shakuhachi",
    "Whistle",
    "Ocarina",
    "Lead 1 (square)",
    "Lead 2 (sawtooth)",
    "Lead 3 (calliope)",
    "Lead 4 (chiff)",
    "Lead 5 (charang)",
    "Lead 6 (voice)",
    "Lead 7 (fifths)",
    "Lead 8 (bass + lead)",
    "Pad 1 (new age)",
    "Pad 2 (warm)",
    "Pad 3 (polysynth)",
    "Pad 4 (choir)",
    "Pad 5 (bowed)",
    "Pad 6 (metallic)",
    "Pad 7 (halo)",
    "Pad 8 (sweep)",
    "FX 1 (rain)",
    "FX 2 (soundtrack)",
    "FX 3 (crystal)",
    "FX 4 (atmosphere)",
    "FX 5 (brightness)",
    "FX 6 (goblins)",
    "FX 7 (echoes)",
    "FX 8 (sci-fi)",
    "Sitar",
    "Banjo",
    "Shamisen",
    "Koto",
    "Kalimba",
    "Bag pipe",
    "Fiddle",
    "Shanai",
    "Tinkle Bell",
    "Agogo",
    "Steel Drums",
    "Woodblock",
    "Taiko Drum",
    "Melodic Tom",
    "Synth Drum",
    "Reverse Cymbal",
    "Guitar Fret Noise",
    "Breath Noise",
    "Seashore",
    "Bird Tweet",
    "Telephone Ring",
    "Helicopter",
    "Applause",
    "Gunshot",
];

/// Program number used for drum tracks in token values.
pub const DRUM_PROGRAM: i32 = -1;

/// Display name for a program, `"Drums"` for -1.
pub fn program_name(program: i32) -> &'static str {
    if program == DRUM_PROGRAM {
        return "Drums";
    }
    usize::try_from(program)
        .ok()
        .and_then(|p| GM_PROGRAM_NAMES.get(p))
        .copied()
        .unwrap_or("Unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub start: u32,
    pub duration: u32,
    pub pitch: u8,
    pub velocity: u8,
}

impl Note {
    pub fn new(start: u32, duration: u32, pitch: u8, velocity: u8) -> Self {
        Note {
            start,
            duration,
            pitch,
            velocity,
        }
    }

    pub fn end(&self) -> u32 {
        self.start + self.duration
    }
}

/// Sustain pedal held from `start` for `duration` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pedal {
    pub start: u32,
    pub duration: u32,
}

impl Pedal {
    pub fn end(&self) -> u32 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PitchBend {
    pub time: u32,
    /// -8192..=8191, 0 is no bend.
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    pub time: u32,
    /// Quarter notes per minute.
    pub qpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub time: u32,
    pub numerator: u8,
    pub denominator: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// General MIDI program, 0..=127.
    pub program: u8,
    pub is_drum: bool,
    pub name: String,
    pub notes: Vec<Note>,
    pub pedals: Vec<Pedal>,
    pub pitch_bends: Vec<PitchBend>,
}

impl Track {
    /// Empty track for a program in token form (-1 for drums).
    pub fn for_program(program: i32) -> Self {
        Track {
            program: u8::try_from(program).unwrap_or(0).min(127),
            is_drum: program == DRUM_PROGRAM,
            name: program_name(program).to_string(),
            notes: Vec::new(),
            pedals: Vec::new(),
            pitch_bends: Vec::new(),
        }
    }

    /// Program in token form: -1 for drums.
    pub fn program_id(&self) -> i32 {
        if self.is_drum {
            DRUM_PROGRAM
        } else {
            i32::from(self.program)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub ticks_per_beat: u32,
    pub tracks: Vec<Track>,
    pub tempos: Vec<Tempo>,
    pub time_signatures: Vec<TimeSignature>,
}

impl Score {
    pub fn new(ticks_per_beat: u32) -> Self {
        Score {
            ticks_per_beat,
            tracks: Vec::new(),
            tempos: Vec::new(),
            time_signatures: Vec::new(),
        }
    }

    /// Tick of the last note end, pedal end, bend or global event.
    pub fn end_tick(&self) -> u32 {
        let tracks = self.tracks.iter().flat_map(|t| {
            t.notes
                .iter()
                .map(Note::end)
                .chain(t.pedals.iter().map(Pedal::end))
                .chain(t.pitch_bends.iter().map(|b| b.time))
        });
        tracks
            .chain(self.tempos.iter().map(|t| t.time))
            .chain(self.time_signatures.iter().map(|t| t.time))
            .max()
            .unwrap_or(0)
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}
