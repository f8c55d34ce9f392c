use crate::mode::MigrationMode;

/// One of the two backends behind the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Local,
    Remote,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ルーティング規則 (Operation 毎に1つ)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Single destination, no fan-out
    Only(Target),
    /// `first`, then `then`. The first failure aborts; `then` answers the caller.
    Sequence { first: Target, then: Target },
    /// `seed` is called at most once per router and its failure is only reported;
    /// `then` is always called and answers.
    SeedOnce { seed: Target, then: Target },
    /// Both backends in order, unconditionally
    Broadcast { first: Target, then: Target },
}

impl Route {
    /// Backends this route may call, in call order
    pub fn targets(self) -> impl Iterator<Item = Target> {
        let (first, second) = match self {
            Route::Only(target) => (target, None),
            Route::Sequence { first, then } | Route::Broadcast { first, then } => {
                (first, Some(then))
            }
            Route::SeedOnce { seed, then } => (seed, Some(then)),
        };
        std::iter::once(first).chain(second)
    }

    pub fn calls(self, target: Target) -> bool {
        self.targets().any(|t| t == target)
    }
}

/// Every operation of the Alertmanager contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ApplyConfig,
    SaveAndApplyConfig,
    SaveAndApplyDefaultConfig,
    GetStatus,
    CreateSilence,
    DeleteSilence,
    GetSilence,
    ListSilences,
    GetAlerts,
    GetAlertGroups,
    PutAlerts,
    GetReceivers,
    TestReceivers,
    TestTemplate,
    CleanUp,
    StopAndWait,
    Ready,
}

impl Operation {
    pub const COUNT: usize = 17;

    pub const ALL: [Operation; Operation::COUNT] = [
        Operation::ApplyConfig,
        Operation::SaveAndApplyConfig,
        Operation::SaveAndApplyDefaultConfig,
        Operation::GetStatus,
        Operation::CreateSilence,
        Operation::DeleteSilence,
        Operation::GetSilence,
        Operation::ListSilences,
        Operation::GetAlerts,
        Operation::GetAlertGroups,
        Operation::PutAlerts,
        Operation::GetReceivers,
        Operation::TestReceivers,
        Operation::TestTemplate,
        Operation::CleanUp,
        Operation::StopAndWait,
        Operation::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyConfig => "apply_config",
            Self::SaveAndApplyConfig => "save_and_apply_config",
            Self::SaveAndApplyDefaultConfig => "save_and_apply_default_config",
            Self::GetStatus => "get_status",
            Self::CreateSilence => "create_silence",
            Self::DeleteSilence => "delete_silence",
            Self::GetSilence => "get_silence",
            Self::ListSilences => "list_silences",
            Self::GetAlerts => "get_alerts",
            Self::GetAlertGroups => "get_alert_groups",
            Self::PutAlerts => "put_alerts",
            Self::GetReceivers => "get_receivers",
            Self::TestReceivers => "test_receivers",
            Self::TestTemplate => "test_template",
            Self::CleanUp => "clean_up",
            Self::StopAndWait => "stop_and_wait",
            Self::Ready => "ready",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ★ Sans-IO Core Logic
/// Operation -> route table, resolved once from a [`MigrationMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
    mode: MigrationMode,
    routes: [Route; Operation::COUNT],
}

impl RoutingPolicy {
    pub fn for_mode(mode: MigrationMode) -> Self {
        Self {
            mode,
            routes: Operation::ALL.map(|op| resolve(mode, op)),
        }
    }

    pub fn mode(&self) -> MigrationMode {
        self.mode
    }

    pub fn route(&self, op: Operation) -> Route {
        self.routes[op as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Operation, Route)> + '_ {
        Operation::ALL.iter().map(move |op| (*op, self.route(*op)))
    }
}

fn resolve(mode: MigrationMode, op: Operation) -> Route {
    use MigrationMode::{RemotePrimary, RemoteSecondary};
    use Operation::*;

    // 読み取りは system of record のみ
    let authoritative = match mode {
        RemoteSecondary => Target::Local,
        RemotePrimary => Target::Remote,
    };

    match (mode, op) {
        // startup / sync: remote gets the configuration once, local every time
        (RemoteSecondary, ApplyConfig) => Route::SeedOnce {
            seed: Target::Remote,
            then: Target::Local,
        },
        (RemotePrimary, ApplyConfig) => Route::Only(Target::Local),

        (RemotePrimary, SaveAndApplyConfig | SaveAndApplyDefaultConfig | DeleteSilence) => {
            Route::Sequence {
                first: Target::Remote,
                then: Target::Local,
            }
        }
        // local ids stay canonical, the remote id is handed back
        (RemotePrimary, CreateSilence) => Route::Sequence {
            first: Target::Local,
            then: Target::Remote,
        },
        (
            RemoteSecondary,
            SaveAndApplyConfig | SaveAndApplyDefaultConfig | CreateSilence | DeleteSilence,
        ) => Route::Only(Target::Local),

        // alerts are high volume, never mirrored
        (
            _,
            GetStatus | GetSilence | ListSilences | GetAlerts | GetAlertGroups | GetReceivers
            | PutAlerts,
        ) => Route::Only(authoritative),

        // dry-runs are not migrated state
        (_, TestReceivers | TestTemplate | CleanUp) => Route::Only(Target::Local),

        (_, StopAndWait) => Route::Broadcast {
            first: Target::Local,
            then: Target::Remote,
        },
        (_, Ready) => Route::Sequence {
            first: Target::Local,
            then: Target::Remote,
        },
    }
}
