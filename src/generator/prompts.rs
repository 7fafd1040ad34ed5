use super::Capability;
use crate::provider::OutputFormat;

/// Instructions and grammar for one DSL domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPrompt {
    /// Custom tool the model writes its DSL through.
    pub tool_name: &'static str,
    /// Tool description.
    pub description: &'static str,
    /// System instructions.
    pub instructions: &'static str,
    /// Lark grammar constraining the tool input.
    pub grammar: &'static str,
}

impl DomainPrompt {
    /// Grammar-constrained output format for this domain.
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::Grammar {
            tool_name: self.tool_name.to_string(),
            description: self.description.to_string(),
            syntax: "lark".to_string(),
            definition: self.grammar.to_string(),
        }
    }
}

/// Structural domain prompt.
pub const DAW: DomainPrompt = DomainPrompt {
    tool_name: "daw_dsl",
    description: "Write track, clip, and effect operations as chained DSL calls.",
    instructions: "You translate music production requests into the structural DSL. \
Only emit operations the request asks for. Use track(id=N) with 1-based ids to refer to \
existing tracks listed in the session state, track(selected=true) for the selected track, \
and track(instrument=..., name=...) to create a new one. Chain clip and effect calls onto \
the track they belong to. When the request also asks for musical or drum content, create \
the track that will hold it and a clip for it, but do not write the notes yourself.",
    grammar: include_str!("../../grammars/daw.lark"),
};

/// Musical-content domain prompt.
pub const ARRANGER: DomainPrompt = DomainPrompt {
    tool_name: "arranger_dsl",
    description: "Write chords, arpeggios, and progressions as DSL calls.",
    instructions: "You write musical content with chord symbols (C, Am7, Em/G). Timing is \
relative: give each call a length in beats and a repeat count; calls are played back to \
back. Prefer one progression(...) for a sequence of chords and arpeggio(...) for broken \
chords. Do not create tracks or clips.",
    grammar: include_str!("../../grammars/arranger.lark"),
};

/// Percussion domain prompt.
pub const DRUMMER: DomainPrompt = DomainPrompt {
    tool_name: "drummer_dsl",
    description: "Write drum grids as pattern and beat calls.",
    instructions: "You program drums with one grid per drum voice. Each grid character is \
one step (sixteenth notes by default): x is a hit, X an accent, o a ghost note, - a rest. \
Group voices that play together into beat(patterns=[...], bars=N). Use only the \
canonical drum names. Do not create tracks or clips.",
    grammar: include_str!("../../grammars/drummer.lark"),
};

/// Prompt for a capability.
pub fn prompt_for(capability: Capability) -> &'static DomainPrompt {
    match capability {
        Capability::Daw => &DAW,
        Capability::Arranger => &ARRANGER,
        Capability::Drummer => &DRUMMER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammars_are_embedded() {
        for capability in Capability::ALL {
            let prompt = prompt_for(capability);
            assert!(prompt.grammar.contains("start:"), "{capability} grammar");
            assert_eq!(prompt.output_format().key(), Some(prompt.tool_name));
        }
    }
}
