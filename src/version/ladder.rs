//! Static engine-version → custom-version ladders.
//!
//! Used when an archive predates the serialized custom-version table, or
//! simply omits a GUID.  Steps ascend by engine version and are evaluated
//! least-version-first; the value of the last step not newer than the
//! archive's engine version wins.

use super::{EngineVersion, Guid};

pub struct Ladder {
    pub name:  &'static str,
    pub guid:  Guid,
    pub steps: &'static [(EngineVersion, i32)],
}

impl Ladder {
    pub fn resolve(&self, engine: EngineVersion) -> Option<i32> {
        self.steps
            .iter()
            .take_while(|(v, _)| *v <= engine)
            .last()
            .map(|(_, n)| *n)
    }
}

const fn v4(minor: u16) -> EngineVersion {
    EngineVersion::ue4(minor)
}

const fn v5(minor: u16) -> EngineVersion {
    EngineVersion::ue5(minor)
}

pub static CORE_OBJECT_VERSION: Ladder = Ladder {
    name:  "CoreObjectVersion",
    guid:  Guid::from_parts(0x375EC13C, 0x06E448FB, 0xB50084F0, 0x262A717E),
    steps: &[(v4(0), 0), (v4(12), 1), (v4(15), 2), (v4(23), 3), (v5(0), 4)],
};

pub static FRAMEWORK_OBJECT_VERSION: Ladder = Ladder {
    name:  "FrameworkObjectVersion",
    guid:  Guid::from_parts(0xCFFC743F, 0x43B04480, 0x939114DF, 0x171D2073),
    steps: &[
        (v4(0), 0),
        (v4(12), 6),
        (v4(13), 12),
        (v4(14), 17),
        (v4(15), 20),
        (v4(16), 23),
        (v4(17), 28),
        (v4(18), 30),
        (v4(19), 33),
        (v4(20), 34),
        (v4(22), 35),
        (v4(24), 37),
    ],
};

pub static EDITOR_OBJECT_VERSION: Ladder = Ladder {
    name:  "EditorObjectVersion",
    guid:  Guid::from_parts(0xE4B068ED, 0xF49442E9, 0xA231DA0B, 0x2E46BB41),
    steps: &[
        (v4(0), 0),
        (v4(12), 2),
        (v4(13), 6),
        (v4(14), 8),
        (v4(15), 14),
        (v4(16), 17),
        (v4(17), 20),
        (v4(18), 24),
        (v4(19), 26),
        (v4(20), 30),
        (v4(21), 33),
        (v4(22), 34),
        (v4(23), 37),
        (v4(24), 38),
        (v4(25), 39),
        (v4(26), 40),
    ],
};

pub static RELEASE_OBJECT_VERSION: Ladder = Ladder {
    name:  "ReleaseObjectVersion",
    guid:  Guid::from_parts(0x9C54D522, 0xA8264FBE, 0x94210746, 0x61B482D0),
    steps: &[
        (v4(0), 0),
        (v4(11), 1),
        (v4(13), 3),
        (v4(14), 4),
        (v4(15), 7),
        (v4(16), 9),
        (v4(17), 10),
        (v4(18), 12),
        (v4(19), 17),
        (v4(20), 20),
        (v4(21), 23),
        (v4(23), 26),
        (v4(24), 28),
        (v4(25), 30),
        (v4(26), 37),
        (v4(27), 43),
    ],
};

static LADDERS: [&Ladder; 4] = [
    &CORE_OBJECT_VERSION,
    &FRAMEWORK_OBJECT_VERSION,
    &EDITOR_OBJECT_VERSION,
    &RELEASE_OBJECT_VERSION,
];

pub fn find(guid: &Guid) -> Option<&'static Ladder> {
    LADDERS.iter().copied().find(|l| &l.guid == guid)
}
