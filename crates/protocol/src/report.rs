//! HID class request constants and keyboard report layout

/// bmRequestType: host-to-device, class, interface
pub const REQUEST_TYPE_CLASS_OUT: u8 = 0x21;
/// bmRequestType: device-to-host, class, interface
pub const REQUEST_TYPE_CLASS_IN: u8 = 0xa1;

/// HID GET_REPORT request
pub const HID_GET_REPORT: u8 = 0x01;
/// HID SET_REPORT request
pub const HID_SET_REPORT: u8 = 0x09;
/// HID SET_IDLE request
pub const HID_SET_IDLE: u8 = 0x0a;

/// Report type in the high byte of wValue
pub const REPORT_TYPE_INPUT: u8 = 0x01;
pub const REPORT_TYPE_OUTPUT: u8 = 0x02;

/// Keyboards used here have a single unnumbered report
pub const REPORT_ID: u8 = 0x00;

/// Idle rate 0 means the device only reports on change
pub const INFINITE_IDLE: u8 = 0x00;

/// LED output report length
pub const OUTPUT_REPORT_LEN: usize = 1;
/// Boot keyboard input report length
pub const INPUT_REPORT_LEN: usize = 8;
/// Offset of the modifier byte in the input report
pub const MODIFIER_BYTE: usize = 0;

/// Keyboard interrupt IN endpoint
pub const DEFAULT_INTERRUPT_ENDPOINT: u8 = 0x81;

/// wValue for GET_REPORT / SET_REPORT
pub const fn report_value(report_type: u8, report_id: u8) -> u16 {
    ((report_type as u16) << 8) | report_id as u16
}

/// wValue for SET_IDLE (duration in 4ms units in the high byte)
pub const fn idle_value(rate: u8, report_id: u8) -> u16 {
    ((rate as u16) << 8) | report_id as u16
}

/// Endpoint address has the IN direction bit set
pub const fn is_in_endpoint(endpoint: u8) -> bool {
    endpoint & 0x80 != 0
}
