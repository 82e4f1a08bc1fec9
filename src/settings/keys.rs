//! Typed setting keys (spec §6, "Settings document layout"). Each key
//! carries its own default so `SettingsDocument::get` never needs a
//! fallible lookup.

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettingKey<T> {
    pub name: &'static str,
    pub default: fn() -> T,
}

impl<T> SettingKey<T> {
    pub const fn new(name: &'static str, default: fn() -> T) -> Self {
        Self { name, default }
    }
}

macro_rules! bool_key {
    ($ident:ident, $name:literal, $default:literal) => {
        pub const $ident: SettingKey<bool> = SettingKey::new($name, || $default);
    };
}

macro_rules! int_key {
    ($ident:ident, $name:literal, $default:literal) => {
        pub const $ident: SettingKey<i64> = SettingKey::new($name, || $default);
    };
}

macro_rules! float_key {
    ($ident:ident, $name:literal, $default:literal) => {
        pub const $ident: SettingKey<f64> = SettingKey::new($name, || $default);
    };
}

bool_key!(ENABLE_FLOATING_RESULTS, "EnableFloatingResults", true);
bool_key!(ENABLE_CLIPBOARD_OPTIMISER, "EnableClipboardOptimiser", true);
bool_key!(
    ENABLE_AUTOMATIC_IMAGE_OPTIMISATIONS,
    "EnableAutomaticImageOptimisations",
    true
);
bool_key!(
    ENABLE_AUTOMATIC_VIDEO_OPTIMISATIONS,
    "EnableAutomaticVideoOptimisations",
    true
);
bool_key!(
    ENABLE_AUTOMATIC_PDF_OPTIMISATIONS,
    "EnableAutomaticPdfOptimisations",
    true
);
bool_key!(
    PAUSE_AUTOMATIC_OPTIMISATIONS,
    "PauseAutomaticOptimisations",
    false
);
bool_key!(
    AUTO_CONVERT_DOCUMENTS_TO_PDF,
    "AutoConvertDocumentsToPdf",
    false
);
bool_key!(
    ENABLE_CROSS_APP_AUTOMATION,
    "EnableCrossAppAutomation",
    true
);
bool_key!(ENABLE_TEAMS_ADAPTIVE_CARDS, "EnableTeamsAdaptiveCards", false);

int_key!(MAX_IMAGE_SIZE_MB, "MaxImageSizeMb", 50);
int_key!(MAX_VIDEO_SIZE_MB, "MaxVideoSizeMb", 500);
int_key!(MAX_PDF_SIZE_MB, "MaxPdfSizeMb", 100);
int_key!(MAX_IMAGE_FILE_COUNT, "MaxImageFileCount", 4);
int_key!(MAX_VIDEO_FILE_COUNT, "MaxVideoFileCount", 2);
int_key!(MAX_PDF_FILE_COUNT, "MaxPdfFileCount", 2);
int_key!(MAX_DOCUMENT_SIZE_MB, "MaxDocumentSizeMb", 100);
int_key!(MAX_DOCUMENT_FILE_COUNT, "MaxDocumentFileCount", 2);
int_key!(AUTOMATION_HTTP_PORT, "AutomationHttpPort", 51338);
int_key!(WATCHER_SUPPRESSION_WINDOW_SECONDS, "WatcherSuppressionWindowSeconds", 120);
int_key!(MAX_IMAGE_DIMENSION_PIXELS, "MaxImageDimensionPixels", 12000);
int_key!(MAX_IMAGE_PIXEL_COUNT, "MaxImagePixelCount", 120_000_000);
int_key!(TARGET_JPEG_QUALITY, "TargetJpegQuality", 82);
int_key!(MIN_JPEG_QUALITY_FALLBACK, "MinJpegQualityFallback", 40);
int_key!(RETINA_LONG_EDGE_PIXELS, "RetinaLongEdgePixels", 2048);
bool_key!(DOWNSCALE_RETINA, "DownscaleRetina", false);
bool_key!(PRESERVE_METADATA, "PreserveMetadata", false);
bool_key!(STRIP_GPS, "StripGps", true);
bool_key!(PRESERVE_COLOR_PROFILES, "PreserveColorProfiles", true);
bool_key!(ENABLE_WIC_FAST_PATH, "EnableWicFastPath", true);
bool_key!(ENABLE_PERCEPTUAL_GUARD, "EnablePerceptualGuard", true);
bool_key!(REJECT_WHEN_BELOW_SSIM_THRESHOLD, "RejectWhenBelowSsimThreshold", true);
bool_key!(REQUIRE_SIZE_IMPROVEMENT, "RequireSizeImprovement", true);
bool_key!(ENABLE_ADVANCED_CODECS, "EnableAdvancedCodecs", false);
float_key!(MIN_FAST_PATH_SAVINGS_PERCENT, "MinFastPathSavingsPercent", 5.0);
float_key!(SSIM_REJECTION_THRESHOLD, "SsimRejectionThreshold", 0.92);

bool_key!(FORCE_MP4, "ForceMp4", false);
bool_key!(USE_HARDWARE_ACCELERATION, "UseHardwareAcceleration", true);
bool_key!(REQUIRE_SIZE_REDUCTION, "RequireSizeReduction", true);
bool_key!(ENABLE_SCENE_CUT_LOOKAHEAD, "EnableSceneCutLookahead", true);
bool_key!(PRESERVE_FILE_TIMES, "PreserveFileTimes", true);
float_key!(HARDWARE_BITRATE_REDUCTION_RATIO, "HardwareBitrateReductionRatio", 0.6);
float_key!(HARDWARE_BITRATE_RETRY_REDUCTION_RATIO, "HardwareBitrateRetryReductionRatio", 0.8);
int_key!(HARDWARE_BITRATE_RETRY_LIMIT, "HardwareBitrateRetryLimit", 2);
float_key!(HARDWARE_MINIMUM_SAVINGS_PERCENT, "HardwareMinimumSavingsPercent", 10.0);
int_key!(HARDWARE_BITRATE_FLOOR_KBPS, "HardwareBitrateFloorKbps", 300);
int_key!(HARDWARE_BITRATE_CEILING_KBPS, "HardwareBitrateCeilingKbps", 20_000);
float_key!(BITRATE_HEADROOM_MULTIPLIER, "BitrateHeadroomMultiplier", 1.5);
float_key!(BITRATE_BUFFER_MULTIPLIER, "BitrateBufferMultiplier", 2.0);
int_key!(TWO_PASS_MINIMUM_DURATION_SECONDS, "TwoPassMinimumDurationSeconds", 60);
int_key!(SCENE_CUT_LOOKAHEAD_FRAMES, "SceneCutLookaheadFrames", 40);
float_key!(MPDECIMATE_HI_THRESHOLD, "MpdecimateHiThreshold", 768.0);

pub const IMAGE_DIRS: SettingKey<Vec<String>> = SettingKey::new("ImageDirs", Vec::new);
pub const VIDEO_DIRS: SettingKey<Vec<String>> = SettingKey::new("VideoDirs", Vec::new);
pub const PDF_DIRS: SettingKey<Vec<String>> = SettingKey::new("PdfDirs", Vec::new);
pub const DOCUMENT_DIRS: SettingKey<Vec<String>> = SettingKey::new("DocumentDirs", Vec::new);
pub const IMAGE_FORMATS_TO_SKIP: SettingKey<Vec<String>> =
    SettingKey::new("ImageFormatsToSkip", Vec::new);
pub const VIDEO_FORMATS_TO_SKIP: SettingKey<Vec<String>> =
    SettingKey::new("VideoFormatsToSkip", Vec::new);

pub const AUTOMATION_ACCESS_TOKEN: SettingKey<String> =
    SettingKey::new("AutomationAccessToken", String::new);
pub const WORK_ROOT_DIR: SettingKey<String> = SettingKey::new("WorkRootDir", || {
    std::env::temp_dir().join("clop").display().to_string()
});

/// Encode a typed default as the JSON representation stored on disk. Used
/// only by the migration/hydration path; typed reads go through
/// `SettingsDocument::get`.
pub fn default_json_for(name: &str) -> Option<Value> {
    let table: &[(&str, fn() -> Value)] = &[
        (ENABLE_FLOATING_RESULTS.name, || json!(true)),
        (ENABLE_CLIPBOARD_OPTIMISER.name, || json!(true)),
        (ENABLE_AUTOMATIC_IMAGE_OPTIMISATIONS.name, || json!(true)),
        (ENABLE_AUTOMATIC_VIDEO_OPTIMISATIONS.name, || json!(true)),
        (ENABLE_AUTOMATIC_PDF_OPTIMISATIONS.name, || json!(true)),
        (PAUSE_AUTOMATIC_OPTIMISATIONS.name, || json!(false)),
        (AUTO_CONVERT_DOCUMENTS_TO_PDF.name, || json!(false)),
        (ENABLE_CROSS_APP_AUTOMATION.name, || json!(true)),
        (ENABLE_TEAMS_ADAPTIVE_CARDS.name, || json!(false)),
        (MAX_IMAGE_SIZE_MB.name, || json!(50)),
        (MAX_VIDEO_SIZE_MB.name, || json!(500)),
        (MAX_PDF_SIZE_MB.name, || json!(100)),
        (MAX_IMAGE_FILE_COUNT.name, || json!(4)),
        (MAX_VIDEO_FILE_COUNT.name, || json!(2)),
        (MAX_PDF_FILE_COUNT.name, || json!(2)),
        (MAX_DOCUMENT_SIZE_MB.name, || json!(100)),
        (MAX_DOCUMENT_FILE_COUNT.name, || json!(2)),
        (AUTOMATION_HTTP_PORT.name, || json!(51338)),
        (WATCHER_SUPPRESSION_WINDOW_SECONDS.name, || json!(120)),
        (IMAGE_DIRS.name, || json!(Vec::<String>::new())),
        (VIDEO_DIRS.name, || json!(Vec::<String>::new())),
        (PDF_DIRS.name, || json!(Vec::<String>::new())),
        (DOCUMENT_DIRS.name, || json!(Vec::<String>::new())),
        (IMAGE_FORMATS_TO_SKIP.name, || json!(Vec::<String>::new())),
        (VIDEO_FORMATS_TO_SKIP.name, || json!(Vec::<String>::new())),
        (AUTOMATION_ACCESS_TOKEN.name, || json!("")),
        (WORK_ROOT_DIR.name, || json!(WORK_ROOT_DIR.default().to_string())),
        (MAX_IMAGE_DIMENSION_PIXELS.name, || json!(12_000)),
        (MAX_IMAGE_PIXEL_COUNT.name, || json!(120_000_000i64)),
        (TARGET_JPEG_QUALITY.name, || json!(82)),
        (MIN_JPEG_QUALITY_FALLBACK.name, || json!(40)),
        (RETINA_LONG_EDGE_PIXELS.name, || json!(2048)),
        (DOWNSCALE_RETINA.name, || json!(false)),
        (PRESERVE_METADATA.name, || json!(false)),
        (STRIP_GPS.name, || json!(true)),
        (PRESERVE_COLOR_PROFILES.name, || json!(true)),
        (ENABLE_WIC_FAST_PATH.name, || json!(true)),
        (ENABLE_PERCEPTUAL_GUARD.name, || json!(true)),
        (REJECT_WHEN_BELOW_SSIM_THRESHOLD.name, || json!(true)),
        (REQUIRE_SIZE_IMPROVEMENT.name, || json!(true)),
        (ENABLE_ADVANCED_CODECS.name, || json!(false)),
        (MIN_FAST_PATH_SAVINGS_PERCENT.name, || json!(5.0)),
        (SSIM_REJECTION_THRESHOLD.name, || json!(0.92)),
        (FORCE_MP4.name, || json!(false)),
        (USE_HARDWARE_ACCELERATION.name, || json!(true)),
        (REQUIRE_SIZE_REDUCTION.name, || json!(true)),
        (ENABLE_SCENE_CUT_LOOKAHEAD.name, || json!(true)),
        (PRESERVE_FILE_TIMES.name, || json!(true)),
        (HARDWARE_BITRATE_REDUCTION_RATIO.name, || json!(0.6)),
        (HARDWARE_BITRATE_RETRY_REDUCTION_RATIO.name, || json!(0.8)),
        (HARDWARE_BITRATE_RETRY_LIMIT.name, || json!(2)),
        (HARDWARE_MINIMUM_SAVINGS_PERCENT.name, || json!(10.0)),
        (HARDWARE_BITRATE_FLOOR_KBPS.name, || json!(300)),
        (HARDWARE_BITRATE_CEILING_KBPS.name, || json!(20_000)),
        (BITRATE_HEADROOM_MULTIPLIER.name, || json!(1.5)),
        (BITRATE_BUFFER_MULTIPLIER.name, || json!(2.0)),
        (TWO_PASS_MINIMUM_DURATION_SECONDS.name, || json!(60)),
        (SCENE_CUT_LOOKAHEAD_FRAMES.name, || json!(40)),
        (MPDECIMATE_HI_THRESHOLD.name, || json!(768.0)),
    ];
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| f())
}

pub const ALL_KEY_NAMES: &[&str] = &[
    ENABLE_FLOATING_RESULTS.name,
    ENABLE_CLIPBOARD_OPTIMISER.name,
    ENABLE_AUTOMATIC_IMAGE_OPTIMISATIONS.name,
    ENABLE_AUTOMATIC_VIDEO_OPTIMISATIONS.name,
    ENABLE_AUTOMATIC_PDF_OPTIMISATIONS.name,
    PAUSE_AUTOMATIC_OPTIMISATIONS.name,
    AUTO_CONVERT_DOCUMENTS_TO_PDF.name,
    ENABLE_CROSS_APP_AUTOMATION.name,
    ENABLE_TEAMS_ADAPTIVE_CARDS.name,
    MAX_IMAGE_SIZE_MB.name,
    MAX_VIDEO_SIZE_MB.name,
    MAX_PDF_SIZE_MB.name,
    MAX_IMAGE_FILE_COUNT.name,
    MAX_VIDEO_FILE_COUNT.name,
    MAX_PDF_FILE_COUNT.name,
    MAX_DOCUMENT_SIZE_MB.name,
    MAX_DOCUMENT_FILE_COUNT.name,
    AUTOMATION_HTTP_PORT.name,
    WATCHER_SUPPRESSION_WINDOW_SECONDS.name,
    IMAGE_DIRS.name,
    VIDEO_DIRS.name,
    PDF_DIRS.name,
    DOCUMENT_DIRS.name,
    IMAGE_FORMATS_TO_SKIP.name,
    VIDEO_FORMATS_TO_SKIP.name,
    AUTOMATION_ACCESS_TOKEN.name,
    WORK_ROOT_DIR.name,
    MAX_IMAGE_DIMENSION_PIXELS.name,
    MAX_IMAGE_PIXEL_COUNT.name,
    TARGET_JPEG_QUALITY.name,
    MIN_JPEG_QUALITY_FALLBACK.name,
    RETINA_LONG_EDGE_PIXELS.name,
    DOWNSCALE_RETINA.name,
    PRESERVE_METADATA.name,
    STRIP_GPS.name,
    PRESERVE_COLOR_PROFILES.name,
    ENABLE_WIC_FAST_PATH.name,
    ENABLE_PERCEPTUAL_GUARD.name,
    REJECT_WHEN_BELOW_SSIM_THRESHOLD.name,
    REQUIRE_SIZE_IMPROVEMENT.name,
    ENABLE_ADVANCED_CODECS.name,
    MIN_FAST_PATH_SAVINGS_PERCENT.name,
    SSIM_REJECTION_THRESHOLD.name,
    FORCE_MP4.name,
    USE_HARDWARE_ACCELERATION.name,
    REQUIRE_SIZE_REDUCTION.name,
    ENABLE_SCENE_CUT_LOOKAHEAD.name,
    PRESERVE_FILE_TIMES.name,
    HARDWARE_BITRATE_REDUCTION_RATIO.name,
    HARDWARE_BITRATE_RETRY_REDUCTION_RATIO.name,
    HARDWARE_BITRATE_RETRY_LIMIT.name,
    HARDWARE_MINIMUM_SAVINGS_PERCENT.name,
    HARDWARE_BITRATE_FLOOR_KBPS.name,
    HARDWARE_BITRATE_CEILING_KBPS.name,
    BITRATE_HEADROOM_MULTIPLIER.name,
    BITRATE_BUFFER_MULTIPLIER.name,
    TWO_PASS_MINIMUM_DURATION_SECONDS.name,
    SCENE_CUT_LOOKAHEAD_FRAMES.name,
    MPDECIMATE_HI_THRESHOLD.name,
];
