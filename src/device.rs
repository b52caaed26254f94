//! Device API (§4.4): the typed surface callers use. This layer maps
//! strings and numbers onto SDIO property codes and wire encodings; it
//! never touches a socket directly — everything flows through [`Session`].

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, info};

use crate::error::{PtpError, Result};
use crate::packet;
use crate::property::{self, PropertyDescriptor};
use crate::session::{Config, Session};

// ---------------------------------------------------------------------------
// Property codes this layer knows about
// ---------------------------------------------------------------------------

const PROP_ISO: u16 = 0xD21E;
const PROP_WHITE_BALANCE: u16 = 0x5005;
const PROP_EXPOSURE_BIAS: u16 = 0x5010;
const PROP_MOVIE_RECORD: u16 = 0xD2C8;
const PROP_RECORDING_STATUS: u16 = 0xD21D;
const PROP_BATTERY: u16 = 0xD218;
const PROP_ZOOM: u16 = 0xD2DD;

// Shutter speed, aperture, and focus mode property codes are not among the
// ones this protocol's public behaviour actually pins down by example (§8
// only exercises ISO, white balance, exposure bias, and zoom on the wire).
// These follow the same `0xD2xx` vendor numbering as their siblings above;
// see DESIGN.md for the reasoning.
const PROP_SHUTTER_SPEED: u16 = 0xD20F;
const PROP_APERTURE: u16 = 0xD210;
const PROP_FOCUS_MODE: u16 = 0xD2D2;

/// A snapshot of the settings surfaced to callers (§6).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    pub iso: String,
    pub shutter_speed: String,
    pub aperture: String,
    pub white_balance: String,
    pub focus_mode: String,
    pub exposure_comp: String,
    pub battery_level: i32,
    pub is_recording: bool,
}

/// A connected camera. Dropping it tears the session down.
pub struct Device {
    session: Option<Session>,
    cache: Mutex<HashMap<u16, PropertyDescriptor>>,
}

impl Device {
    /// Run the handshake to `Ready`, then prime live-view by asking for the
    /// live-view object's info (§4.4).
    pub fn connect(ip: &str) -> Result<Self> {
        Self::connect_with_config(ip, &Config::default())
    }

    /// As [`Self::connect`], with caller-supplied tunables (keep-alive
    /// interval, friendly name, live-view polling cadence).
    pub fn connect_with_config(ip: &str, config: &Config) -> Result<Self> {
        let session = Session::connect_with_config(ip, config)?;
        let (code, _) = session.command(packet::OP_GET_OBJECT_INFO, &[packet::LIVE_VIEW_HANDLE])?;
        if code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code });
        }
        info!("connected, live-view primed");
        Ok(Self { session: Some(session), cache: Mutex::new(HashMap::new()) })
    }

    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.disconnect();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_ready)
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().filter(|s| s.is_ready()).ok_or(PtpError::NotConnected)
    }

    // -----------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------

    /// Fetch and parse the full property table, refreshing the internal
    /// cache used by [`Self::cached_settings`].
    pub fn get_all_properties(&self) -> Result<HashMap<u16, PropertyDescriptor>> {
        let (payload, code, _) = self.session()?.read(packet::OP_SDIO_GET_ALL_EXT_DEVICE_PROP_INFO, &[])?;
        if code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code });
        }
        let parsed = property::parse_all(&payload)?;
        *self.cache.lock().unwrap() = parsed.clone();
        Ok(parsed)
    }

    /// Write a 2-byte little-endian property value.
    pub fn set_property_u16(&self, code: u16, value: u16) -> Result<()> {
        self.write_property(code, &value.to_le_bytes())
    }

    /// Write a 4-byte little-endian property value.
    pub fn set_property_u32(&self, code: u16, value: u32) -> Result<()> {
        self.write_property(code, &value.to_le_bytes())
    }

    fn write_property(&self, code: u16, payload: &[u8]) -> Result<()> {
        let (resp_code, _) = self.session()?.write(packet::OP_SDIO_CONTROL_DEVICE, &[code as u32, 0], payload)?;
        if resp_code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code: resp_code });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Live view
    // -----------------------------------------------------------------

    /// Fetch the live-view frame. Returns `None` if the current payload
    /// isn't a valid JPEG sub-region (§3) rather than erroring — a missing
    /// frame is routine while the camera assembles the next one.
    pub fn get_live_frame(&self) -> Result<Option<Vec<u8>>> {
        let (payload, code, _) = self.session()?.read(packet::OP_GET_OBJECT, &[packet::LIVE_VIEW_HANDLE])?;
        if code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code });
        }
        Ok(extract_live_frame(&payload))
    }

    // -----------------------------------------------------------------
    // Named convenience operations (§4.4)
    // -----------------------------------------------------------------

    pub fn set_iso(&self, value: &str) -> Result<()> {
        self.set_property_u32(PROP_ISO, encode_iso(value)?)
    }

    pub fn set_shutter_speed(&self, value: &str) -> Result<()> {
        self.set_property_u32(PROP_SHUTTER_SPEED, encode_shutter_speed(value)?)
    }

    pub fn set_aperture(&self, value: &str) -> Result<()> {
        self.set_property_u16(PROP_APERTURE, encode_aperture(value)?)
    }

    pub fn set_white_balance(&self, value: &str) -> Result<()> {
        self.set_property_u16(PROP_WHITE_BALANCE, encode_white_balance(value)?)
    }

    pub fn set_focus_mode(&self, value: &str) -> Result<()> {
        self.set_property_u16(PROP_FOCUS_MODE, encode_focus_mode(value)?)
    }

    pub fn set_exposure_compensation(&self, ev: f64) -> Result<()> {
        self.set_property_u32(PROP_EXPOSURE_BIAS, encode_exposure_bias(ev)? as u32)
    }

    pub fn start_recording(&self) -> Result<()> {
        self.set_property_u16(PROP_MOVIE_RECORD, 0x0002)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.set_property_u16(PROP_MOVIE_RECORD, 0x0001)
    }

    pub fn start_zoom(&self, direction: &str, speed: u32) -> Result<()> {
        self.set_property_u32(PROP_ZOOM, encode_zoom(direction, speed)?)
    }

    pub fn stop_zoom(&self) -> Result<()> {
        self.set_property_u32(PROP_ZOOM, 0)
    }

    /// Fetch a fresh property table and format it per §6.
    pub fn get_settings(&self) -> Result<Settings> {
        let props = self.get_all_properties()?;
        Ok(format_settings(&props))
    }

    /// The last property table fetched by [`Self::get_all_properties`] or
    /// [`Self::get_settings`], formatted the same way but without a round
    /// trip to the camera. `None` before the first fetch.
    pub fn cached_settings(&self) -> Option<Settings> {
        let cache = self.cache.lock().unwrap();
        if cache.is_empty() {
            None
        } else {
            Some(format_settings(&cache))
        }
    }

    /// True if the event channel has observed a state-change notification
    /// since the last check (§4.3 event handling). Callers typically use
    /// this to decide whether to re-fetch settings.
    pub fn refresh_pending(&self) -> bool {
        self.session.as_ref().is_some_and(Session::take_refresh_pending)
    }

    /// Raw `GetDeviceInfo` response parameters, exposed for diagnostics.
    pub fn get_device_info(&self) -> Result<Vec<u32>> {
        let (_, code, params) = self.session()?.read(packet::OP_GET_DEVICE_INFO, &[])?;
        if code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code });
        }
        Ok(params)
    }

    /// Raw `GetStorageIDs` response parameters, exposed for diagnostics.
    pub fn get_storage_ids(&self) -> Result<Vec<u32>> {
        let (_, code, params) = self.session()?.read(packet::OP_GET_STORAGE_IDS, &[])?;
        if code != packet::RESP_OK {
            return Err(PtpError::OperationFailed { code });
        }
        Ok(params)
    }

    pub fn battery_level(&self) -> i32 {
        self.cache
            .lock()
            .unwrap()
            .get(&PROP_BATTERY)
            .map(|d| d.current_value as i32)
            .unwrap_or(-1)
    }

    pub fn is_recording(&self) -> bool {
        self.cache
            .lock()
            .unwrap()
            .get(&PROP_RECORDING_STATUS)
            .is_some_and(|d| d.current_value == 0x01)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Live-view framing (§3)
// ---------------------------------------------------------------------------

const LIVE_VIEW_SUBHEADER_LEN: usize = 16;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

fn extract_live_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() <= LIVE_VIEW_SUBHEADER_LEN {
        return None;
    }
    let image_offset = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let image_size = u32::from_le_bytes(payload[4..8].try_into().unwrap()) as usize;
    if image_size == 0 {
        return None;
    }
    let end = image_offset.checked_add(image_size)?;
    if end > payload.len() {
        return None;
    }
    let region = &payload[image_offset..end];
    if region.len() < 2 || region[..2] != JPEG_SOI {
        return None;
    }
    Some(region.to_vec())
}

// ---------------------------------------------------------------------------
// Value encodings (§4.4)
// ---------------------------------------------------------------------------

fn encode_iso(value: &str) -> Result<u32> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(0xFFFFFF);
    }
    value
        .parse::<u32>()
        .map_err(|_| PtpError::InvalidArgument(format!("invalid ISO value: {value}")))
}

fn format_iso(raw: u32) -> String {
    if raw == 0xFFFFFF {
        "Auto".to_string()
    } else {
        raw.to_string()
    }
}

const SHUTTER_SPEEDS: &[(&str, u32, u32)] = &[
    ("1/24", 1, 24),
    ("1/30", 1, 30),
    ("1/48", 1, 48),
    ("1/50", 1, 50),
    ("1/60", 1, 60),
    ("1/100", 1, 100),
    ("1/120", 1, 120),
    ("1/250", 1, 250),
    ("1/500", 1, 500),
    ("1/1000", 1, 1000),
];

fn encode_shutter_speed(value: &str) -> Result<u32> {
    SHUTTER_SPEEDS
        .iter()
        .find(|(text, _, _)| *text == value)
        .map(|(_, num, den)| (num << 16) | den)
        .ok_or_else(|| PtpError::InvalidArgument(format!("unsupported shutter speed: {value}")))
}

fn format_shutter(raw: u32) -> String {
    let num = raw >> 16;
    let den = raw & 0xFFFF;
    if den == 0 {
        format!("{num}\"")
    } else if num == 1 {
        format!("1/{den}")
    } else {
        format!("{num}/{den}")
    }
}

fn encode_aperture(value: &str) -> Result<u16> {
    let numeric = value.strip_prefix("f/").or_else(|| value.strip_prefix('f')).unwrap_or(value);
    let n: f64 = numeric
        .parse()
        .map_err(|_| PtpError::InvalidArgument(format!("invalid aperture value: {value}")))?;
    if !n.is_finite() || n <= 0.0 {
        return Err(PtpError::InvalidArgument(format!("invalid aperture value: {value}")));
    }
    Ok((n * 100.0).round() as u16)
}

fn format_aperture(raw: u32) -> String {
    if raw == 0 {
        "--".to_string()
    } else {
        format!("f/{:.1}", raw as f64 / 100.0)
    }
}

fn encode_exposure_bias(ev: f64) -> Result<i32> {
    if !(-3.0..=3.0).contains(&ev) {
        return Err(PtpError::InvalidArgument(format!("exposure bias out of range: {ev}")));
    }
    Ok((ev * 1000.0).round() as i32)
}

fn format_exposure_bias(raw: i32) -> String {
    let ev = raw as f64 / 1000.0;
    if ev >= 0.0 {
        format!("+{ev:.1}")
    } else {
        format!("{ev:.1}")
    }
}

const WHITE_BALANCES: &[(&str, u16)] = &[
    ("auto", 0x0002),
    ("daylight", 0x0004),
    ("shade", 0x8011),
    ("cloudy", 0x8010),
    ("tungsten", 0x0006),
    ("fluorescent", 0x0001),
    ("flash", 0x0007),
    ("custom", 0x8020),
];

fn encode_white_balance(value: &str) -> Result<u16> {
    let lower = value.to_ascii_lowercase();
    WHITE_BALANCES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, code)| *code)
        .ok_or_else(|| PtpError::InvalidArgument(format!("unsupported white balance: {value}")))
}

fn format_white_balance(raw: u32) -> String {
    WHITE_BALANCES
        .iter()
        .find(|(_, code)| *code as u32 == raw)
        .map(|(name, _)| capitalize(name))
        .unwrap_or_else(|| format!("0x{raw:04X}"))
}

const FOCUS_MODES: &[(&str, u16)] = &[
    ("mf", 0x0001),
    ("af-s", 0x0002),
    ("af-c", 0x8004),
    ("dmf", 0x8005),
];

fn encode_focus_mode(value: &str) -> Result<u16> {
    let lower = value.to_ascii_lowercase();
    FOCUS_MODES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, code)| *code)
        .ok_or_else(|| PtpError::InvalidArgument(format!("unsupported focus mode: {value}")))
}

fn format_focus_mode(raw: u32) -> String {
    FOCUS_MODES
        .iter()
        .find(|(_, code)| *code as u32 == raw)
        .map(|(name, _)| name.to_ascii_uppercase())
        .unwrap_or_else(|| format!("0x{raw:04X}"))
}

fn encode_zoom(direction: &str, speed: u32) -> Result<u32> {
    let direction_code: u32 = match direction.to_ascii_lowercase().as_str() {
        "in" | "tele" => 0x0001,
        "out" | "wide" => 0x0002,
        other => return Err(PtpError::InvalidArgument(format!("unsupported zoom direction: {other}"))),
    };
    if !(1..=7).contains(&speed) {
        return Err(PtpError::InvalidArgument(format!("zoom speed out of range: {speed}")));
    }
    Ok((direction_code << 16) | speed)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn format_settings(props: &HashMap<u16, PropertyDescriptor>) -> Settings {
    let raw = |code: u16| props.get(&code).map(|d| d.current_value).unwrap_or(0);
    debug!("formatting {} cached properties into settings", props.len());
    Settings {
        iso: format_iso(raw(PROP_ISO)),
        shutter_speed: format_shutter(raw(PROP_SHUTTER_SPEED)),
        aperture: format_aperture(raw(PROP_APERTURE)),
        white_balance: format_white_balance(raw(PROP_WHITE_BALANCE)),
        focus_mode: format_focus_mode(raw(PROP_FOCUS_MODE)),
        exposure_comp: format_exposure_bias(raw(PROP_EXPOSURE_BIAS) as i32),
        battery_level: props.get(&PROP_BATTERY).map(|d| d.current_value as i32).unwrap_or(-1),
        is_recording: props.get(&PROP_RECORDING_STATUS).is_some_and(|d| d.current_value == 0x01),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_auto_is_case_insensitive() {
        assert_eq!(encode_iso("AUTO").unwrap(), 0xFFFFFF);
        assert_eq!(encode_iso("auto").unwrap(), 0xFFFFFF);
    }

    #[test]
    fn iso_numeric_round_trip() {
        assert_eq!(encode_iso("800").unwrap(), 800);
        assert_eq!(format_iso(800), "800");
        assert_eq!(format_iso(0xFFFFFF), "Auto");
    }

    #[test]
    fn iso_rejects_garbage() {
        assert!(encode_iso("bright").is_err());
    }

    #[test]
    fn shutter_speed_round_trips_every_enumerated_value() {
        for &(text, _, _) in SHUTTER_SPEEDS {
            let raw = encode_shutter_speed(text).unwrap();
            assert_eq!(format_shutter(raw), text);
        }
    }

    #[test]
    fn shutter_speed_rejects_unlisted_value() {
        assert!(encode_shutter_speed("1/17").is_err());
    }

    #[test]
    fn aperture_accepts_all_written_forms() {
        assert_eq!(encode_aperture("f/2.8").unwrap(), 280);
        assert_eq!(encode_aperture("f2.8").unwrap(), 280);
        assert_eq!(encode_aperture("2.8").unwrap(), 280);
    }

    #[test]
    fn aperture_formatting() {
        assert_eq!(format_aperture(280), "f/2.8");
        assert_eq!(format_aperture(0), "--");
    }

    #[test]
    fn exposure_bias_round_trip_within_tolerance() {
        for tenth in -30..=30 {
            let ev = tenth as f64 / 10.0;
            let raw = encode_exposure_bias(ev).unwrap();
            let back = raw as f64 / 1000.0;
            assert!((back - ev).abs() < 0.001);
        }
    }

    #[test]
    fn exposure_bias_rejects_out_of_range() {
        assert!(encode_exposure_bias(3.1).is_err());
        assert!(encode_exposure_bias(-3.1).is_err());
    }

    #[test]
    fn exposure_bias_matches_scenario_4() {
        let raw = encode_exposure_bias(-0.7).unwrap();
        assert_eq!(raw, -700);
        assert_eq!((raw as u32).to_le_bytes(), [0x24, 0xFD, 0xFF, 0xFF]);
    }

    #[test]
    fn exposure_bias_formatting_has_explicit_sign() {
        assert_eq!(format_exposure_bias(700), "+0.7");
        assert_eq!(format_exposure_bias(-1300), "-1.3");
        assert_eq!(format_exposure_bias(0), "+0.0");
    }

    #[test]
    fn white_balance_matches_scenario_3() {
        assert_eq!(encode_white_balance("daylight").unwrap(), 0x0004);
        assert_eq!(encode_white_balance("DAYLIGHT").unwrap(), 0x0004);
    }

    #[test]
    fn white_balance_formatting_round_trips() {
        for &(name, code) in WHITE_BALANCES {
            assert_eq!(format_white_balance(code as u32), capitalize(name));
        }
    }

    #[test]
    fn focus_mode_is_case_insensitive() {
        assert_eq!(encode_focus_mode("af-c").unwrap(), 0x8004);
        assert_eq!(encode_focus_mode("AF-C").unwrap(), 0x8004);
    }

    #[test]
    fn zoom_matches_scenario_5() {
        let raw = encode_zoom("in", 3).unwrap();
        assert_eq!(raw.to_le_bytes(), [0x03, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn zoom_rejects_bad_speed() {
        assert!(encode_zoom("in", 0).is_err());
        assert!(encode_zoom("in", 8).is_err());
    }

    #[test]
    fn zoom_rejects_bad_direction() {
        assert!(encode_zoom("sideways", 1).is_err());
    }

    #[test]
    fn live_frame_matches_scenario_6() {
        let mut payload = vec![0u8; 16];
        payload[0..4].copy_from_slice(&16u32.to_le_bytes()); // offset
        payload[4..8].copy_from_slice(&5u32.to_le_bytes()); // size
        payload.extend_from_slice(&[0xFF, 0xD8, 0xAA, 0xBB, 0xCC]);
        assert_eq!(extract_live_frame(&payload), Some(vec![0xFF, 0xD8, 0xAA, 0xBB, 0xCC]));
    }

    #[test]
    fn live_frame_rejects_short_payload() {
        assert_eq!(extract_live_frame(&[0u8; 10]), None);
    }

    #[test]
    fn live_frame_rejects_zero_size() {
        let mut payload = vec![0u8; 16];
        payload[0..4].copy_from_slice(&16u32.to_le_bytes());
        assert_eq!(extract_live_frame(&payload), None);
    }

    #[test]
    fn live_frame_rejects_out_of_bounds_region() {
        let mut payload = vec![0u8; 16];
        payload[0..4].copy_from_slice(&16u32.to_le_bytes());
        payload[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert_eq!(extract_live_frame(&payload), None);
    }

    #[test]
    fn live_frame_rejects_missing_soi() {
        let mut payload = vec![0u8; 16];
        payload[0..4].copy_from_slice(&16u32.to_le_bytes());
        payload[4..8].copy_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(extract_live_frame(&payload), None);
    }
}
