//! Minimal SNTP (RFC 4330) client packets.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PACKET_LEN: usize = 48;

/// Seconds from 1900-01-01 to the unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
const VERSION: u8 = 4;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const LEAP_ALARM: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("short packet: {0} bytes")]
    Short(usize),
    #[error("unexpected mode {0} in reply")]
    Mode(u8),
    #[error("kiss-o'-death from server: {0}")]
    KissOfDeath(String),
    #[error("server clock is not synchronized")]
    Unsynchronized,
    #[error("reply doesn't match the request")]
    OriginMismatch,
}

/// 32.32 fixed point seconds since 1900.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp(u64);

impl NtpTimestamp {
    pub fn from_system_time(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = d.as_secs() + NTP_UNIX_OFFSET;
        let frac = ((d.subsec_nanos() as u64) << 32) / 1_000_000_000;
        NtpTimestamp((secs << 32) | frac)
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Nanoseconds since the unix epoch.
    pub fn unix_nanos(self) -> i128 {
        let secs = (self.0 >> 32) as i128 - NTP_UNIX_OFFSET as i128;
        let frac = (self.0 & 0xffff_ffff) as i128;
        secs * 1_000_000_000 + ((frac * 1_000_000_000) >> 32)
    }

    fn read(buf: &[u8], at: usize) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[at..at + 8]);
        NtpTimestamp(u64::from_be_bytes(raw))
    }

    fn write(self, buf: &mut [u8], at: usize) {
        buf[at..at + 8].copy_from_slice(&self.0.to_be_bytes());
    }
}

/// Client request carrying `transmit` as its transmit timestamp.
pub fn request(transmit: NtpTimestamp) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0] = (VERSION << 3) | MODE_CLIENT;
    transmit.write(&mut buf, 40);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub stratum: u8,
    /// Server receive time (t2).
    pub receive: NtpTimestamp,
    /// Server transmit time (t3).
    pub transmit: NtpTimestamp,
}

/// Validate a server reply to the request sent at `sent`.
pub fn parse_reply(buf: &[u8], sent: NtpTimestamp) -> Result<Reply, PacketError> {
    if buf.len() < PACKET_LEN {
        return Err(PacketError::Short(buf.len()));
    }

    let leap = buf[0] >> 6;
    let mode = buf[0] & 0x7;
    if mode != MODE_SERVER {
        return Err(PacketError::Mode(mode));
    }

    let stratum = buf[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&buf[12..16]).into_owned();
        return Err(PacketError::KissOfDeath(code));
    }
    if leap == LEAP_ALARM {
        return Err(PacketError::Unsynchronized);
    }

    if NtpTimestamp::read(buf, 24) != sent {
        return Err(PacketError::OriginMismatch);
    }

    Ok(Reply {
        stratum,
        receive: NtpTimestamp::read(buf, 32),
        transmit: NtpTimestamp::read(buf, 40),
    })
}

/// Server reply built from the request, used to answer queries locally.
#[cfg(test)]
pub fn reply(
    req: &[u8],
    stratum: u8,
    receive: NtpTimestamp,
    transmit: NtpTimestamp,
) -> Result<[u8; PACKET_LEN], PacketError> {
    if req.len() < PACKET_LEN {
        return Err(PacketError::Short(req.len()));
    }
    let mut buf = [0u8; PACKET_LEN];
    buf[0] = (VERSION << 3) | MODE_SERVER;
    buf[1] = stratum;
    buf[24..32].copy_from_slice(&req[40..48]);
    receive.write(&mut buf, 32);
    transmit.write(&mut buf, 40);
    Ok(buf)
}

/// Local clock offset against the server: `((t2 - t1) + (t3 - t4)) / 2`.
pub fn offset(sent: NtpTimestamp, reply: &Reply, received: NtpTimestamp) -> i128 {
    let t1 = sent.unix_nanos();
    let t2 = reply.receive.unix_nanos();
    let t3 = reply.transmit.unix_nanos();
    let t4 = received.unix_nanos();
    ((t2 - t1) + (t3 - t4)) / 2
}

/// Magnitude of an offset in nanoseconds as a [`Duration`].
pub fn offset_magnitude(offset: i128) -> Duration {
    let nanos = offset.unsigned_abs().min(u64::MAX as u128) as u64;
    Duration::from_nanos(nanos)
}
