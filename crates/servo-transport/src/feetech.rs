use crate::{
    BusAddress, BusInfo, ConfigRegister, FieldKind, Result, ServoDriver, TransportError,
    BROADCAST_ADDRESS,
};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};

const HEADER: [u8; 2] = [0xFF, 0xFF];
const MAX_PARAMS: usize = 250;
// Bytes skipped while hunting for a status header before giving up.
const MAX_SYNC_BYTES: usize = 64;

const INST_PING: u8 = 0x01;
const INST_READ: u8 = 0x02;
const INST_WRITE: u8 = 0x03;
const INST_SYNC_WRITE: u8 = 0x83;

// Register table shared by both families.
const REG_ID: u8 = 5;
const REG_MIN_ANGLE_LIMIT: u8 = 9;
const REG_TORQUE_ENABLE: u8 = 40;
const REG_GOAL_POSITION: u8 = 42;
const REG_PRESENT_POSITION: u8 = 56;
const REG_PRESENT_SPEED: u8 = 58;
const REG_PRESENT_LOAD: u8 = 60;
const REG_PRESENT_VOLTAGE: u8 = 62;
const REG_PRESENT_TEMPERATURE: u8 = 63;
const REG_MOVING: u8 = 66;
const REG_PRESENT_CURRENT: u8 = 69;

// ST-class only.
const STS_REG_MODE: u8 = 33;
const STS_REG_ACC: u8 = 41;
const STS_REG_LOCK: u8 = 55;

// SC-class only.
const SCS_REG_LOCK: u8 = 48;

/// Byte order of 16-bit registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Endian {
    Little,
    Big,
}

fn encode_word(value: u16, endian: Endian) -> [u8; 2] {
    match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    }
}

fn decode_word(bytes: [u8; 2], endian: Endian) -> u16 {
    match endian {
        Endian::Little => u16::from_le_bytes(bytes),
        Endian::Big => u16::from_be_bytes(bytes),
    }
}

/// Sign-magnitude decode: bit `sign_bit` carries the sign, the bits below it the magnitude.
fn from_sign_magnitude(raw: u16, sign_bit: u8) -> i32 {
    let sign = 1u16 << sign_bit;
    let magnitude = i32::from(raw & (sign - 1));
    if raw & sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn to_sign_magnitude(value: i16, sign_bit: u8) -> u16 {
    let sign = 1u16 << sign_bit;
    let magnitude = value.unsigned_abs() & (sign - 1);
    if value < 0 {
        magnitude | sign
    } else {
        magnitude
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build one instruction packet: `FF FF id len instr params… chk`.
fn encode_packet(id: u8, instruction: u8, params: &[u8]) -> Result<Vec<u8>> {
    if params.len() > MAX_PARAMS {
        return Err(TransportError::InvalidFrame("too many parameters"));
    }
    let len = params.len() as u8 + 2;
    let mut out = Vec::with_capacity(params.len() + 6);
    out.extend_from_slice(&HEADER);
    out.push(id);
    out.push(len);
    out.push(instruction);
    out.extend_from_slice(params);
    out.push(checksum(&out[2..]));
    Ok(out)
}

/// Decoded status packet: `FF FF id len err params… chk`.
#[derive(Clone, Debug, Eq, PartialEq)]
struct StatusPacket {
    id: u8,
    error: u8,
    params: Vec<u8>,
}

/// Decode the body that follows the header (`id len err params… chk`).
fn decode_status_body(body: &[u8]) -> Result<StatusPacket> {
    if body.len() < 4 {
        return Err(TransportError::InvalidFrame("short status"));
    }
    let id = body[0];
    let len = usize::from(body[1]);
    if len < 2 || body.len() != len + 2 {
        return Err(TransportError::InvalidFrame("status length"));
    }
    let (payload, chk) = body.split_at(body.len() - 1);
    if checksum(payload) != chk[0] {
        return Err(TransportError::InvalidFrame("checksum"));
    }
    Ok(StatusPacket {
        id,
        error: body[2],
        params: body[3..body.len() - 1].to_vec(),
    })
}

/// Servo alarm bits carried in the status byte.
const ALARMS: [(u8, &str); 5] = [
    (0x01, "voltage"),
    (0x02, "angle_sensor"),
    (0x04, "overheat"),
    (0x08, "overcurrent"),
    (0x20, "overload"),
];

fn alarm_names(error: u8) -> Vec<&'static str> {
    ALARMS
        .iter()
        .filter(|(bit, _)| error & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Check a decoded status against the servo it was addressed to.
///
/// The status byte is an alarm bitmask, not a refusal: the servo still executed the request
/// and the payload is valid, so alarms are logged and the packet is returned.
fn accept_status(expected: u8, status: StatusPacket) -> Result<StatusPacket> {
    if status.id != expected {
        return Err(TransportError::InvalidFrame("status from unexpected id"));
    }
    if status.error != 0 {
        warn!(
            address = status.id,
            status = status.error,
            alarms = ?alarm_names(status.error),
            "servo reports alarm"
        );
    }
    Ok(status)
}

/// The physical half-duplex UART both servo families share.
pub struct SerialLine {
    port_name: String,
    port: Box<dyn SerialPort>,
}

/// Handle the two drivers hold on one [`SerialLine`].
pub type SharedLine = Arc<Mutex<SerialLine>>;

impl SerialLine {
    /// Open the UART (8N1) with a per-read timeout.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(port = path, baud, "serial line open");
        Ok(Self {
            port_name: path.to_string(),
            port,
        })
    }

    pub fn shared(self) -> SharedLine {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.port_name
    }

    pub fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            let driver = match p.port_type {
                SerialPortType::UsbPort(_) => "usb-serial",
                _ => "serial",
            };
            out.push(BusInfo {
                name: p.port_name,
                driver: driver.to_string(),
            });
        }
        Ok(out)
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        // Drop anything left over from an earlier, abandoned exchange.
        self.port.clear(ClearBuffer::Input).ok();
        self.port.write_all(packet).map_err(map_io)?;
        self.port.flush().map_err(map_io)?;
        trace!(port = %self.port_name, bytes = packet.len(), "tx");
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(map_io)
    }

    fn recv_status(&mut self, expected: u8) -> Result<StatusPacket> {
        let mut prev = 0u8;
        let mut skipped = 0usize;
        loop {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte)?;
            if prev == HEADER[0] && byte[0] == HEADER[1] {
                break;
            }
            prev = byte[0];
            skipped += 1;
            if skipped > MAX_SYNC_BYTES {
                return Err(TransportError::InvalidFrame("no status header"));
            }
        }
        let mut head = [0u8; 2];
        self.read_exact(&mut head)?;
        let len = usize::from(head[1]);
        if len < 2 {
            return Err(TransportError::InvalidFrame("status length"));
        }
        let mut body = vec![0u8; len + 2];
        body[..2].copy_from_slice(&head);
        self.read_exact(&mut body[2..])?;
        accept_status(expected, decode_status_body(&body)?)
    }

    /// One request/response exchange with a single servo.
    fn exchange(&mut self, id: u8, instruction: u8, params: &[u8]) -> Result<StatusPacket> {
        let packet = encode_packet(id, instruction, params)?;
        self.send(&packet)?;
        self.recv_status(id)
    }

    /// Broadcast packet; servos never answer these.
    fn broadcast(&mut self, instruction: u8, params: &[u8]) -> Result<()> {
        let packet = encode_packet(BROADCAST_ADDRESS.raw(), instruction, params)?;
        self.send(&packet)
    }
}

fn map_io(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        _ => TransportError::Io(e.to_string()),
    }
}

/// Register-level access shared by both families.
struct Link {
    line: SharedLine,
    endian: Endian,
}

impl Link {
    fn with_line<T>(&self, f: impl FnOnce(&mut SerialLine) -> Result<T>) -> Result<T> {
        let mut line = self
            .line
            .lock()
            .map_err(|_| TransportError::Io("serial line lock poisoned".to_string()))?;
        f(&mut line)
    }

    fn ping(&self, address: BusAddress) -> Result<BusAddress> {
        let status = self
            .with_line(|line| line.exchange(address.raw(), INST_PING, &[]))
            .map_err(|e| match e {
                TransportError::Timeout => TransportError::NotFound(address),
                other => other,
            })?;
        Ok(BusAddress(status.id))
    }

    fn read(&self, address: BusAddress, register: u8, len: u8) -> Result<Vec<u8>> {
        let status =
            self.with_line(|line| line.exchange(address.raw(), INST_READ, &[register, len]))?;
        if status.params.len() != usize::from(len) {
            return Err(TransportError::InvalidFrame("read length"));
        }
        Ok(status.params)
    }

    fn read_byte(&self, address: BusAddress, register: u8) -> Result<u8> {
        Ok(self.read(address, register, 1)?[0])
    }

    fn read_word(&self, address: BusAddress, register: u8) -> Result<u16> {
        let bytes = self.read(address, register, 2)?;
        Ok(decode_word([bytes[0], bytes[1]], self.endian))
    }

    fn write(&self, address: BusAddress, register: u8, data: &[u8]) -> Result<()> {
        let mut params = Vec::with_capacity(data.len() + 1);
        params.push(register);
        params.extend_from_slice(data);
        self.with_line(|line| line.exchange(address.raw(), INST_WRITE, &params))?;
        Ok(())
    }

    fn write_byte(&self, address: BusAddress, register: u8, value: u8) -> Result<()> {
        self.write(address, register, &[value])
    }

    /// Fields whose register layout is identical across families.
    fn read_common(&self, address: BusAddress, field: FieldKind) -> Result<i32> {
        match field {
            FieldKind::Position => Ok(from_sign_magnitude(
                self.read_word(address, REG_PRESENT_POSITION)?,
                15,
            )),
            FieldKind::Speed => Ok(from_sign_magnitude(
                self.read_word(address, REG_PRESENT_SPEED)?,
                15,
            )),
            FieldKind::Load => Ok(from_sign_magnitude(
                self.read_word(address, REG_PRESENT_LOAD)?,
                10,
            )),
            FieldKind::Voltage => Ok(i32::from(self.read_byte(address, REG_PRESENT_VOLTAGE)?)),
            FieldKind::Temperature => Ok(i32::from(
                self.read_byte(address, REG_PRESENT_TEMPERATURE)?,
            )),
            FieldKind::MovingFlag => Ok(i32::from(self.read_byte(address, REG_MOVING)?)),
            FieldKind::Current => Ok(from_sign_magnitude(
                self.read_word(address, REG_PRESENT_CURRENT)?,
                15,
            )),
            FieldKind::Mode => Err(TransportError::Unsupported("mode register is family-specific")),
        }
    }

    fn config_register(register: ConfigRegister) -> u8 {
        match register {
            ConfigRegister::Id => REG_ID,
            ConfigRegister::Raw(r) => r,
        }
    }
}

/// ST-class (SMS/STS) driver: little-endian registers, acceleration, synchronized writes.
pub struct StsDriver {
    link: Link,
}

impl StsDriver {
    pub fn new(line: SharedLine) -> Self {
        Self {
            link: Link {
                line,
                endian: Endian::Little,
            },
        }
    }

    /// Goal block starting at the acceleration register: acc, position, time, speed.
    fn goal_block(&self, position: i16, velocity: u16, acceleration: u8) -> [u8; 7] {
        let pos = encode_word(to_sign_magnitude(position, 15), self.link.endian);
        let time = encode_word(0, self.link.endian);
        let speed = encode_word(velocity, self.link.endian);
        [
            acceleration,
            pos[0],
            pos[1],
            time[0],
            time[1],
            speed[0],
            speed[1],
        ]
    }
}

impl ServoDriver for StsDriver {
    fn name(&self) -> &str {
        "sts"
    }

    fn ping(&mut self, address: BusAddress) -> Result<BusAddress> {
        self.link.ping(address)
    }

    fn write_position(
        &mut self,
        address: BusAddress,
        position: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<()> {
        let block = self.goal_block(position, velocity, acceleration);
        self.link.write(address, STS_REG_ACC, &block)
    }

    fn write_position_batch(
        &mut self,
        addresses: &[BusAddress],
        positions: &[i16],
        velocities: &[u16],
        accelerations: &[u8],
    ) -> Result<()> {
        let n = addresses.len();
        if positions.len() != n || velocities.len() != n || accelerations.len() != n {
            return Err(TransportError::InvalidFrame("batch length mismatch"));
        }
        let mut params = Vec::with_capacity(2 + n * 8);
        params.push(STS_REG_ACC);
        params.push(7);
        for i in 0..n {
            params.push(addresses[i].raw());
            params.extend_from_slice(&self.goal_block(positions[i], velocities[i], accelerations[i]));
        }
        self.link
            .with_line(|line| line.broadcast(INST_SYNC_WRITE, &params))
    }

    fn read_field(&mut self, address: BusAddress, field: FieldKind) -> Result<i32> {
        match field {
            FieldKind::Mode => Ok(i32::from(self.link.read_byte(address, STS_REG_MODE)?)),
            other => self.link.read_common(address, other),
        }
    }

    fn set_torque(&mut self, address: BusAddress, enabled: bool) -> Result<()> {
        self.link
            .write_byte(address, REG_TORQUE_ENABLE, u8::from(enabled))
    }

    fn unlock_config(&mut self, address: BusAddress) -> Result<()> {
        self.link.write_byte(address, STS_REG_LOCK, 0)
    }

    fn write_config_byte(
        &mut self,
        address: BusAddress,
        register: ConfigRegister,
        value: u8,
    ) -> Result<()> {
        self.link
            .write_byte(address, Link::config_register(register), value)
    }

    fn lock_config(&mut self, address: BusAddress) -> Result<()> {
        self.link.write_byte(address, STS_REG_LOCK, 1)
    }
}

/// SC-class (SCSCL) driver: big-endian registers, no acceleration, no synchronized write.
pub struct ScsDriver {
    link: Link,
}

impl ScsDriver {
    pub fn new(line: SharedLine) -> Self {
        Self {
            link: Link {
                line,
                endian: Endian::Big,
            },
        }
    }
}

impl ServoDriver for ScsDriver {
    fn name(&self) -> &str {
        "scs"
    }

    fn ping(&mut self, address: BusAddress) -> Result<BusAddress> {
        self.link.ping(address)
    }

    fn write_position(
        &mut self,
        address: BusAddress,
        position: i16,
        velocity: u16,
        _acceleration: u8,
    ) -> Result<()> {
        let pos = encode_word(to_sign_magnitude(position, 15), self.link.endian);
        let time = encode_word(0, self.link.endian);
        let speed = encode_word(velocity, self.link.endian);
        self.link.write(
            address,
            REG_GOAL_POSITION,
            &[pos[0], pos[1], time[0], time[1], speed[0], speed[1]],
        )
    }

    fn read_field(&mut self, address: BusAddress, field: FieldKind) -> Result<i32> {
        match field {
            // Wheel (PWM) mode is selected by zeroing both angle limits.
            FieldKind::Mode => {
                let limits = self.link.read(address, REG_MIN_ANGLE_LIMIT, 4)?;
                Ok(i32::from(limits.iter().all(|b| *b == 0)))
            }
            other => self.link.read_common(address, other),
        }
    }

    fn set_torque(&mut self, address: BusAddress, enabled: bool) -> Result<()> {
        self.link
            .write_byte(address, REG_TORQUE_ENABLE, u8::from(enabled))
    }

    fn unlock_config(&mut self, address: BusAddress) -> Result<()> {
        self.link.write_byte(address, SCS_REG_LOCK, 0)
    }

    fn write_config_byte(
        &mut self,
        address: BusAddress,
        register: ConfigRegister,
        value: u8,
    ) -> Result<()> {
        self.link
            .write_byte(address, Link::config_register(register), value)
    }

    fn lock_config(&mut self, address: BusAddress) -> Result<()> {
        self.link.write_byte(address, SCS_REG_LOCK, 1)
    }
}
