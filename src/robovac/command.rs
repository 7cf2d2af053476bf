use std::fmt;

/// A RoboVac data point register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PlayPause,
    WorkMode,
    Activity,
    GoHome,
    FindMyRobot,
    Battery,
    Error,
    CleaningRuntime,
    CleaningCoverage,
    Volume,
    Consumables,
    Multimaps,
    Rooms,
    Voice,
    Hello,
    AutoReturn,
    Status,
}

impl Command {
    pub const ALL: [Command; 17] = [
        Command::PlayPause,
        Command::WorkMode,
        Command::Activity,
        Command::GoHome,
        Command::FindMyRobot,
        Command::Battery,
        Command::Error,
        Command::CleaningRuntime,
        Command::CleaningCoverage,
        Command::Volume,
        Command::Consumables,
        Command::Multimaps,
        Command::Rooms,
        Command::Voice,
        Command::Hello,
        Command::AutoReturn,
        Command::Status,
    ];

    /// DP id as it appears in the device's `dps` object.
    pub fn dp_id(self) -> &'static str {
        match self {
            Command::PlayPause => "2",
            Command::WorkMode => "5",
            Command::Activity => "15",
            Command::GoHome => "101",
            Command::FindMyRobot => "103",
            Command::Battery => "104",
            Command::Error => "106",
            Command::CleaningRuntime => "109",
            Command::CleaningCoverage => "110",
            Command::Volume => "111",
            Command::Consumables => "116",
            Command::Multimaps => "117",
            Command::Rooms => "124",
            Command::Voice => "125",
            Command::Hello => "126",
            Command::AutoReturn => "135",
            Command::Status => "142",
        }
    }

    pub fn from_dp_id(dp_id: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.dp_id() == dp_id)
    }

    /// Event name, also used as the MQTT state topic segment.
    pub fn name(self) -> &'static str {
        match self {
            Command::PlayPause => "play_pause",
            Command::WorkMode => "work_mode",
            Command::Activity => "activity",
            Command::GoHome => "go_home",
            Command::FindMyRobot => "locate",
            Command::Battery => "battery",
            Command::Error => "error",
            Command::CleaningRuntime => "runtime",
            Command::CleaningCoverage => "coverage",
            Command::Volume => "volume",
            Command::Consumables => "consumables",
            Command::Multimaps => "multimaps",
            Command::Rooms => "rooms",
            Command::Voice => "voice",
            Command::Hello => "hello",
            Command::AutoReturn => "auto_return",
            Command::Status => "status",
        }
    }

    /// Registers whose value is a base64 string wrapping a JSON document.
    pub fn is_encoded(self) -> bool {
        matches!(
            self,
            Command::Consumables
                | Command::Multimaps
                | Command::Rooms
                | Command::Voice
                | Command::Hello
                | Command::Status
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
