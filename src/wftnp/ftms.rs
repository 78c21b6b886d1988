//! FTMS profile: GATT discovery against the cached WFTNP transport, the
//! control-point write/indicate round trip, and the opcode builders.

use log::warn;
use uuid::Uuid;

use crate::config::{
    CONTROL_POINT_TIMEOUT, CRR_RANGE, CW_RANGE, GRADE_RANGE_PERCENT, TARGET_POWER_RANGE,
    WIND_RANGE_MPS,
};
use crate::error::{FtmsError, FtmsResultCode, ProtocolErrorKind, TransportError};
use crate::wftnp::frame::MessageType;
use crate::wftnp::transport::Transport;
use crate::wftnp::uuid16;

const OP_REQUEST_CONTROL: u8 = 0x00;
const OP_RESET: u8 = 0x01;
const OP_SET_TARGET_RESISTANCE: u8 = 0x04;
const OP_SET_TARGET_POWER: u8 = 0x05;
const OP_START_OR_RESUME: u8 = 0x07;
const OP_STOP_OR_PAUSE: u8 = 0x08;
const OP_SIM_PARAMETERS: u8 = 0x11;

/// A discovered FTMS characteristic: its UUID and GATT properties
/// (`READ=0x01 WRITE=0x02 NOTIFY=0x04`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: u8,
}

/// The FTMS profile layered on a connected [`Transport`].
pub struct Ftms {
    transport: Transport,
    control_point: Option<Uuid>,
}

impl Ftms {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            control_point: None,
        }
    }

    /// Discovers the FTMS service and its characteristics, caches the
    /// control-point UUID, and subscribes to it plus whichever of Indoor
    /// Bike Data / Fitness Machine Status the caller asked for.
    pub async fn initialize(
        &mut self,
        subscribe_bike: bool,
        subscribe_status: bool,
    ) -> Result<(), FtmsError> {
        let services = self.discover_services().await?;
        if !services.contains(&uuid16::FTMS_SERVICE) {
            return Err(FtmsError::FtmsUnavailable);
        }

        let characteristics = self.discover_characteristics(uuid16::FTMS_SERVICE).await?;
        let control_point = characteristics
            .iter()
            .find(|c| c.uuid == uuid16::FITNESS_MACHINE_CONTROL_POINT)
            .ok_or(FtmsError::ControlPointMissing)?;

        self.control_point = Some(control_point.uuid);
        self.transport
            .set_control_point_uuid(control_point.uuid)
            .await;
        self.enable_notifications(control_point.uuid, true).await?;

        if subscribe_bike {
            if let Some(c) = characteristics
                .iter()
                .find(|c| c.uuid == uuid16::INDOOR_BIKE_DATA)
            {
                self.enable_notifications(c.uuid, true).await?;
            }
        }
        if subscribe_status {
            if let Some(c) = characteristics
                .iter()
                .find(|c| c.uuid == uuid16::FITNESS_MACHINE_STATUS)
            {
                self.enable_notifications(c.uuid, true).await?;
            }
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, FtmsError> {
        let payload = self
            .transport
            .request(MessageType::DiscoverServices, vec![])
            .await?;
        if payload.len() % 16 != 0 {
            return Err(TransportError::Protocol(ProtocolErrorKind::Malformed).into());
        }
        Ok(payload
            .chunks_exact(16)
            .filter_map(uuid16::from_wire_bytes)
            .collect())
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Characteristic>, FtmsError> {
        let request = uuid16::to_wire_bytes(&service).to_vec();
        let payload = self
            .transport
            .request(MessageType::DiscoverCharacteristics, request)
            .await?;
        if payload.len() < 16 {
            return Err(TransportError::Protocol(ProtocolErrorKind::Malformed).into());
        }
        let echoed = uuid16::from_wire_bytes(&payload[..16])
            .ok_or(TransportError::Protocol(ProtocolErrorKind::Malformed))?;
        if echoed != service {
            return Err(TransportError::Protocol(ProtocolErrorKind::UuidMismatch).into());
        }
        let records = &payload[16..];
        if records.len() % 17 != 0 {
            return Err(TransportError::Protocol(ProtocolErrorKind::Malformed).into());
        }
        Ok(records
            .chunks_exact(17)
            .filter_map(|r| {
                uuid16::from_wire_bytes(&r[..16]).map(|uuid| Characteristic {
                    uuid,
                    properties: r[16],
                })
            })
            .collect())
    }

    async fn enable_notifications(&self, uuid: Uuid, enable: bool) -> Result<(), FtmsError> {
        let mut payload = uuid16::to_wire_bytes(&uuid).to_vec();
        payload.push(if enable { 0x01 } else { 0x00 });
        self.transport
            .request(MessageType::EnableNotifications, payload)
            .await?;
        Ok(())
    }

    fn control_point_uuid(&self) -> Result<Uuid, FtmsError> {
        self.control_point.ok_or(FtmsError::ControlPointMissing)
    }

    /// Writes `opcode || body` to the control point, then awaits a
    /// matching `[0x80, opcode, result]` indication, discarding any
    /// intervening entries that don't match.
    async fn do_op(&self, opcode: u8, body: Vec<u8>) -> Result<(), FtmsError> {
        let cp = self.control_point_uuid()?;
        let mut value = vec![opcode];
        value.extend_from_slice(&body);
        let mut payload = uuid16::to_wire_bytes(&cp).to_vec();
        payload.extend_from_slice(&value);
        self.transport
            .request(MessageType::WriteCharacteristic, payload)
            .await?;

        loop {
            let entry = self
                .transport
                .recv_control_point(CONTROL_POINT_TIMEOUT)
                .await?;
            if entry.len() >= 3 && entry[0] == 0x80 && entry[1] == opcode {
                let result = entry[2];
                return if result == 0x01 {
                    Ok(())
                } else {
                    Err(FtmsError::ResultError {
                        opcode,
                        code: FtmsResultCode::from_code(result),
                    })
                };
            }
        }
    }

    pub async fn request_control(&self) -> Result<(), FtmsError> {
        self.do_op(OP_REQUEST_CONTROL, vec![]).await
    }

    pub async fn reset(&self) -> Result<(), FtmsError> {
        self.do_op(OP_RESET, vec![]).await
    }

    pub async fn start_or_resume(&self) -> Result<(), FtmsError> {
        self.do_op(OP_START_OR_RESUME, vec![]).await
    }

    /// Devices vary in whether they support `stop_or_pause`; an
    /// `OP_CODE_NOT_SUPPORTED` result is tolerated rather than treated as
    /// a failure.
    pub async fn stop_or_pause(&self) -> Result<(), FtmsError> {
        match self.do_op(OP_STOP_OR_PAUSE, vec![]).await {
            Err(FtmsError::ResultError {
                code: FtmsResultCode::OpCodeNotSupported,
                ..
            }) => {
                warn!("trainer does not support stop_or_pause (0x08); tolerating");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn set_target_power(&self, watts: i32) -> Result<(), FtmsError> {
        self.do_op(OP_SET_TARGET_POWER, encode_target_power(watts))
            .await
    }

    pub async fn set_target_resistance(&self, percent: f32) -> Result<(), FtmsError> {
        self.do_op(OP_SET_TARGET_RESISTANCE, encode_target_resistance(percent))
            .await
    }

    pub async fn set_simulation_parameters(
        &self,
        grade_percent: f32,
        wind_mps: f32,
        crr: f32,
        cw: f32,
    ) -> Result<(), FtmsError> {
        self.do_op(
            OP_SIM_PARAMETERS,
            encode_simulation(grade_percent, wind_mps, crr, cw),
        )
        .await
    }
}

/// `u16_LE(clamp(watts, 0, 600))`.
fn encode_target_power(watts: i32) -> Vec<u8> {
    let clamped = watts.clamp(TARGET_POWER_RANGE.0, TARGET_POWER_RANGE.1);
    (clamped as u16).to_le_bytes().to_vec()
}

/// `sint16_LE(round(clamp(percent, 0, 100) * 10))`, 0.1% resolution.
fn encode_target_resistance(percent: f32) -> Vec<u8> {
    let clamped = percent.clamp(0.0, 100.0);
    let raw = (clamped as f64 * 10.0).round() as i16;
    raw.to_le_bytes().to_vec()
}

/// `wind(i16, ×1000 m/s) | grade(i16, ×100 %) | crr(u8, ×10000) | cw(u8, ×100 kg/m)`,
/// each input clamped before scaling and each raw integer saturated to its
/// wire width. Rounding is nearest, ties away from zero (`f64::round`'s
/// behavior).
fn encode_simulation(grade_percent: f32, wind_mps: f32, crr: f32, cw: f32) -> Vec<u8> {
    let wind = wind_mps.clamp(WIND_RANGE_MPS.0, WIND_RANGE_MPS.1);
    let grade = grade_percent.clamp(GRADE_RANGE_PERCENT.0, GRADE_RANGE_PERCENT.1);
    let crr = crr.clamp(CRR_RANGE.0, CRR_RANGE.1);
    let cw = cw.clamp(CW_RANGE.0, CW_RANGE.1);

    let wind_raw = (wind as f64 * 1000.0).round() as i16;
    let grade_raw = (grade as f64 * 100.0).round() as i16;
    let crr_raw = (crr as f64 * 10000.0).round() as u8;
    let cw_raw = (cw as f64 * 100.0).round() as u8;

    let mut body = Vec::with_capacity(6);
    body.extend_from_slice(&wind_raw.to_le_bytes());
    body.extend_from_slice(&grade_raw.to_le_bytes());
    body.push(crr_raw);
    body.push(cw_raw);
    body
}
