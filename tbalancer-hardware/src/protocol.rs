//! bigNG wire protocol constants and frame layout
//!
//! Every frame the controller emits is exactly [`FRAME_LENGTH`] bytes. Byte 0
//! carries the start flag, byte 1 the device-variant marker. All offsets are
//! fixed device-protocol constants and must match the firmware byte for byte.

use std::time::Duration;

/// Length of every frame the controller emits
pub const FRAME_LENGTH: usize = 285;

/// First byte of every valid frame
pub const START_FLAG: u8 = 100;

/// Terminator byte validating each miniNG sub-block
pub const END_FLAG: u8 = 254;

/// Variant marker for a bigNG status frame
pub const BIG_NG_MARKER: u8 = 255;

/// Alternate variant marker some bigNG firmware revisions emit
pub const BIG_NG_MARKER_ALT: u8 = 88;

/// Variant marker for a miniNG frame, also the nested marker announcing a
/// second sub-block
pub const MINI_NG_MARKER: u8 = 253;

/// Request opcode for the primary status frame
pub const REQUEST_STATUS: u8 = 0x38;

/// Request opcode for the alternative (miniNG) frame
pub const REQUEST_ALTERNATIVE: u8 = 0x37;

/// Delay before the alternative request is written
pub const ALTERNATIVE_REQUEST_DELAY: Duration = Duration::from_millis(500);

// bigNG channel counts
pub const DIGITAL_TEMP_COUNT: usize = 8;
pub const ANALOG_TEMP_COUNT: usize = 4;
pub const HUB_TEMP_COUNT: usize = 6;
pub const HUB_FLOW_COUNT: usize = 2;
pub const FAN_COUNT: usize = 4;

// bigNG frame offsets
/// Per-channel fan mode bits; bit clear = PWM, bit set = analog
pub const FAN_MODE_MASK_OFFSET: usize = 136;
/// Raw duty bytes for channels in PWM mode, one per channel
pub const FAN_PWM_DUTY_OFFSET: usize = 137;
/// Raw duty bytes for channels in analog mode, one per channel
pub const FAN_ANALOG_DUTY_OFFSET: usize = 141;
/// 16-bit little-endian maximum fan speed, two bytes per channel
pub const FAN_MAX_RPM_OFFSET: usize = 148;
/// Flow meter pulse counts, one per hub flow channel
pub const HUB_FLOW_OFFSET: usize = 231;
/// Timebase byte shared by both flow channels
pub const HUB_FLOW_TIMEBASE_OFFSET: usize = 234;
/// Digital temperature channels
pub const DIGITAL_TEMP_OFFSET: usize = 238;
/// Sensor hub temperature channels
pub const HUB_TEMP_OFFSET: usize = 246;
/// Analog temperature channels
pub const ANALOG_TEMP_OFFSET: usize = 260;
/// Negotiated protocol version byte; frames with a mismatch are dropped
pub const PROTOCOL_VERSION_OFFSET: usize = 274;

// miniNG sub-blocks
/// Number of miniNG units one alternative frame can carry
pub const MINI_NG_COUNT: usize = 2;
/// Channels reported per miniNG unit
pub const MINI_NG_CHANNELS: usize = 2;
/// Size of one miniNG sub-block
pub const MINI_NG_BLOCK_LENGTH: usize = 65;
/// Absolute offset of the marker announcing the second sub-block
pub const MINI_NG_NESTED_MARKER_OFFSET: usize = 66;
// Relative offsets within one sub-block
pub const MINI_NG_TEMP_OFFSET: usize = 7;
pub const MINI_NG_FAN_OFFSET: usize = 11;
pub const MINI_NG_CONTROL_OFFSET: usize = 15;
pub const MINI_NG_END_FLAG_OFFSET: usize = 61;

/// Frame variant discriminated from byte 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Primary bigNG status frame
    BigNg,
    /// miniNG sub-device frame
    MiniNg,
    /// Anything else; the frame is ignored entirely
    Unknown,
}

impl FrameKind {
    /// Discriminate a frame from its variant marker byte
    pub fn from_marker(marker: u8) -> Self {
        match marker {
            BIG_NG_MARKER | BIG_NG_MARKER_ALT => FrameKind::BigNg,
            MINI_NG_MARKER => FrameKind::MiniNg,
            _ => FrameKind::Unknown,
        }
    }
}

/// Compose a little-endian u16 from a raw byte pair
#[inline]
pub fn u16_le(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}
