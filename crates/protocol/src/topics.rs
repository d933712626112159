//! Well-known topics and API ids exposed by the device.

/// Telemetry and request topics.
pub mod topic {
    /// Low-level joint/IMU state stream.
    pub const LOW_STATE: &str = "rt/lf/lowstate";
    /// Sport-mode state stream.
    pub const SPORT_MOD_STATE: &str = "rt/lf/sportmodestate";
    /// Aggregated device state stream.
    pub const MULTIPLE_STATE: &str = "rt/multiplestate";
    /// Sport command requests.
    pub const SPORT_REQUEST: &str = "rt/api/sport/request";
    /// Voice-UI (leds, volume) requests.
    pub const VUI_REQUEST: &str = "rt/api/vui/request";
    /// Audio hub requests (playback, megaphone, uploads).
    pub const AUDIO_HUB_REQUEST: &str = "rt/api/audiohub/request";
    /// Compressed LiDAR voxel frames.
    pub const VOXEL_MAP_COMPRESSED: &str = "rt/utlidar/voxel_map_compressed";
}

/// Sport-mode command API ids.
pub mod sport {
    pub const DAMP: i64 = 1001;
    pub const BALANCE_STAND: i64 = 1002;
    pub const STOP_MOVE: i64 = 1003;
    pub const STAND_UP: i64 = 1004;
    pub const STAND_DOWN: i64 = 1005;
    pub const RECOVERY_STAND: i64 = 1006;
    pub const EULER: i64 = 1007;
    pub const MOVE: i64 = 1008;
    pub const SIT: i64 = 1009;
    pub const RISE_SIT: i64 = 1010;
    pub const SWITCH_GAIT: i64 = 1011;
    pub const TRIGGER: i64 = 1012;
    pub const BODY_HEIGHT: i64 = 1013;
    pub const FOOT_RAISE_HEIGHT: i64 = 1014;
    pub const SPEED_LEVEL: i64 = 1015;
    pub const HELLO: i64 = 1016;
    pub const STRETCH: i64 = 1017;
}

/// Audio hub API ids (vendor app protocol).
pub mod audio {
    pub const GET_AUDIO_LIST: i64 = 1001;
    pub const SELECT_START_PLAY: i64 = 1002;
    pub const PAUSE: i64 = 1003;
    pub const UNSUSPEND: i64 = 1004;
    pub const SET_PLAY_MODE: i64 = 1005;
    pub const SELECT_DELETE: i64 = 1006;
    pub const GET_PLAY_MODE: i64 = 1007;
    pub const SELECT_RENAME: i64 = 1008;
    pub const ENTER_MEGAPHONE: i64 = 1009;
    pub const EXIT_MEGAPHONE: i64 = 1010;
    pub const UPLOAD_MEGAPHONE: i64 = 1011;
    pub const UPLOAD_AUDIO_FILE: i64 = 1012;
}
