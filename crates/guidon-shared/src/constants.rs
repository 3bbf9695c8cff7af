/// Application name
pub const APP_NAME: &str = "Guidon";

/// Service name reported by health endpoints
pub const SERVICE_NAME: &str = "guidon";

/// Edge length of the square canvas
pub const CANVAS_SIZE: u32 = 48;

/// Color of a pixel nobody has drawn yet
pub const DEFAULT_COLOR: &str = "#FFFFFF";

/// Scale factor used by renderers (one canvas cell = N image pixels)
pub const PIXEL_SCALE: u32 = 10;

/// Discord interaction request types
pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

/// Discord interaction response types
pub const RESPONSE_PONG: u8 = 1;
pub const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
pub const RESPONSE_DEFERRED_CHANNEL_MESSAGE: u8 = 5;

/// Message flag: only the invoking user sees the reply
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

/// Guild permission bits that grant admin commands
pub const PERMISSION_ADMINISTRATOR: u64 = 0x8;
pub const PERMISSION_MANAGE_GUILD: u64 = 0x20;

/// Request headers carrying the Discord signature
pub const HEADER_SIGNATURE: &str = "x-signature-ed25519";
pub const HEADER_TIMESTAMP: &str = "x-signature-timestamp";

/// Commands an unregistered caller may still invoke
pub const REGISTRATION_EXEMPT: &[&str] = &["register", "help", "ping", "hello"];

/// Commands that consume rate-limited resources
pub const METERED_COMMANDS: &[&str] = &["draw", "snapshot"];

/// Embed accent colors
pub const COLOR_SUCCESS: u32 = 0x00FF00;
pub const COLOR_INFO: u32 = 0x0066CC;
pub const COLOR_WARNING: u32 = 0xFF6B6B;
pub const COLOR_ERROR: u32 = 0xFF4C4C;
pub const COLOR_PREMIUM: u32 = 0xFFD700;
pub const COLOR_SNAPSHOT: u32 = 0x4ECDC4;
pub const COLOR_PALETTE: u32 = 0x00AAFF;

/// Returns `true` if `command` is metered by the rate limiter.
pub fn is_metered(command: &str) -> bool {
    METERED_COMMANDS.contains(&command)
}

/// Returns `true` if `command` can run without a registered account.
pub fn is_registration_exempt(command: &str) -> bool {
    REGISTRATION_EXEMPT.contains(&command)
}
