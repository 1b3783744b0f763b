//! Replays scripted operator sessions against the emulator and writes one
//! transcript per scenario under `transcripts/`.

use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../plant.rs"]
mod plant;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use psu_core::ps_module::PsModel;
use session::Session;

struct Scenario {
    name: &'static str,
    model: PsModel,
    script: &'static [&'static str],
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "fap-turn-on",
        model: PsModel::Fap,
        script: &[
            "status",
            "turn-on",
            "setpoint 20",
            "sim run 2000",
            "loop closed",
            "setpoint 2.5",
            "sim run 500",
            "status",
            "turn-off",
        ],
    },
    Scenario {
        name: "fap-overcurrent",
        model: PsModel::Fap,
        script: &[
            "turn-on",
            "setpoint 10",
            "sim run 1000",
            "sim short",
            "sim run 100",
            "status",
            "reset",
            "sim clear",
            "reset",
            "status",
        ],
    },
    Scenario {
        name: "fap-welded-contactor",
        model: PsModel::Fap,
        script: &["turn-on", "sim weld", "turn-off", "status", "reset", "status"],
    },
    Scenario {
        name: "fac-acdc-turn-on",
        model: PsModel::FacAcDc,
        script: &["turn-on", "sim run 200", "status", "sim sag", "sim run 100", "status"],
    },
];

fn main() -> io::Result<()> {
    for scenario in SCENARIOS {
        let path = PathBuf::from("transcripts").join(format!("{}.log", scenario.name));
        let mut session = Session::new(scenario.model, Some(&path))?;
        for line in scenario.script {
            session.handle_command(line)?;
        }
        println!("wrote {}", path.display());
    }
    Ok(())
}
