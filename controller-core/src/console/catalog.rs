//! Operator command table.
//!
//! The parser and the `help` output read the same entries, so keywords,
//! argument layouts and usage strings stay in sync.

use crate::{event_manager::InterlockKind, ps_module::PsState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    TurnOn,
    TurnOff,
    Reset,
    Status,
    Setpoint,
    Mode,
    Loop,
    Interlock,
    Help,
}

/// Value selected by a keyword argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceTag {
    Mode(PsState),
    OpenLoop,
    ClosedLoop,
    Kind(InterlockKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Keyword {
    pub word: &'static str,
    pub tag: ChoiceTag,
}

/// Argument layout following the command keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgSpec {
    None,
    /// One decimal number.
    Number,
    /// One keyword from the list.
    Choice(&'static [Keyword]),
    /// One keyword from the list followed by an unsigned index.
    ChoiceThenIndex(&'static [Keyword]),
    /// Optional free identifier.
    Topic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub args: ArgSpec,
    pub usage: &'static str,
    pub summary: &'static str,
}

const MODES: [Keyword; 5] = [
    Keyword {
        word: "slowref",
        tag: ChoiceTag::Mode(PsState::SlowRef),
    },
    Keyword {
        word: "slowrefsync",
        tag: ChoiceTag::Mode(PsState::SlowRefSync),
    },
    Keyword {
        word: "cycle",
        tag: ChoiceTag::Mode(PsState::Cycle),
    },
    Keyword {
        word: "rmpwfm",
        tag: ChoiceTag::Mode(PsState::RmpWfm),
    },
    Keyword {
        word: "migwfm",
        tag: ChoiceTag::Mode(PsState::MigWfm),
    },
];

const LOOPS: [Keyword; 2] = [
    Keyword {
        word: "open",
        tag: ChoiceTag::OpenLoop,
    },
    Keyword {
        word: "closed",
        tag: ChoiceTag::ClosedLoop,
    },
];

const KINDS: [Keyword; 2] = [
    Keyword {
        word: "hard",
        tag: ChoiceTag::Kind(InterlockKind::Hard),
    },
    Keyword {
        word: "soft",
        tag: ChoiceTag::Kind(InterlockKind::Soft),
    },
];

const COMMANDS: [CommandSpec; 9] = [
    CommandSpec {
        name: "turn-on",
        tag: CommandTag::TurnOn,
        args: ArgSpec::None,
        usage: "turn-on",
        summary: "run the energisation sequence from off",
    },
    CommandSpec {
        name: "turn-off",
        tag: CommandTag::TurnOff,
        args: ArgSpec::None,
        usage: "turn-off",
        summary: "disable the output and open the contactors",
    },
    CommandSpec {
        name: "reset",
        tag: CommandTag::Reset,
        args: ArgSpec::None,
        usage: "reset",
        summary: "clear latched interlocks and alarms",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        args: ArgSpec::None,
        usage: "status",
        summary: "show state, references and latched interlocks",
    },
    CommandSpec {
        name: "setpoint",
        tag: CommandTag::Setpoint,
        args: ArgSpec::Number,
        usage: "setpoint <value>",
        summary: "set the slow reference target",
    },
    CommandSpec {
        name: "mode",
        tag: CommandTag::Mode,
        args: ArgSpec::Choice(&MODES),
        usage: "mode <slowref|slowrefsync|cycle|rmpwfm|migwfm>",
        summary: "select the operating mode",
    },
    CommandSpec {
        name: "loop",
        tag: CommandTag::Loop,
        args: ArgSpec::Choice(&LOOPS),
        usage: "loop <open|closed>",
        summary: "switch between open and closed loop control",
    },
    CommandSpec {
        name: "interlock",
        tag: CommandTag::Interlock,
        args: ArgSpec::ChoiceThenIndex(&KINDS),
        usage: "interlock <hard|soft> <index>",
        summary: "latch an interlock immediately",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        args: ArgSpec::Topic,
        usage: "help [command]",
        summary: "list commands or show one command's usage",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Finds a keyword in `choices` (case insensitive).
#[must_use]
pub fn find_choice(choices: &'static [Keyword], word: &str) -> Option<&'static Keyword> {
    choices
        .iter()
        .find(|choice| choice.word.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(find("Turn-On").map(|spec| spec.tag), Some(CommandTag::TurnOn));
        assert!(find("reboot").is_none());
        assert_eq!(
            find_choice(&MODES, "CYCLE").map(|keyword| keyword.tag),
            Some(ChoiceTag::Mode(PsState::Cycle))
        );
    }

    #[test]
    fn usage_starts_with_the_command_name() {
        for spec in commands() {
            assert!(spec.usage.starts_with(spec.name), "{}", spec.name);
        }
    }
}
