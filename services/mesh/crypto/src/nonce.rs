//! 13-byte AES-CCM nonces.
//!
//! ```text
//! network:     0x00 | CTL<<7|TTL | SEQ(3) | SRC(2) | 0x0000  | IV(4)
//! application: 0x01 | ASZMIC<<7  | SEQ(3) | SRC(2) | DST(2)  | IV(4)
//! device:      0x02 | ASZMIC<<7  | SEQ(3) | SRC(2) | DST(2)  | IV(4)
//! proxy:       0x03 | 0x00       | SEQ(3) | SRC(2) | 0x0000  | IV(4)
//! ```

/// Size of a mesh nonce in bytes
pub const NONCE_SIZE: usize = 13;

/// AES-CCM nonce
pub type Nonce = [u8; NONCE_SIZE];

const NETWORK_NONCE: u8 = 0x00;
const APPLICATION_NONCE: u8 = 0x01;
const DEVICE_NONCE: u8 = 0x02;
const PROXY_NONCE: u8 = 0x03;

/// Writes the low 24 bits of `seq` big-endian
fn put_seq(out: &mut [u8], seq: u32) {
    out.copy_from_slice(&seq.to_be_bytes()[1..]);
}

fn build(nonce_type: u8, second: u8, seq: u32, src: u16, dst: u16, iv_index: u32) -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = nonce_type;
    nonce[1] = second;
    put_seq(&mut nonce[2..5], seq);
    nonce[5..7].copy_from_slice(&src.to_be_bytes());
    nonce[7..9].copy_from_slice(&dst.to_be_bytes());
    nonce[9..13].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

/// Network nonce, used with the network encryption key
pub fn network_nonce(ctl: bool, ttl: u8, seq: u32, src: u16, iv_index: u32) -> Nonce {
    let ctl_ttl = ((ctl as u8) << 7) | (ttl & 0x7F);
    build(NETWORK_NONCE, ctl_ttl, seq, src, 0x0000, iv_index)
}

/// Application nonce, used with an application key
pub fn application_nonce(aszmic: bool, seq: u32, src: u16, dst: u16, iv_index: u32) -> Nonce {
    build(APPLICATION_NONCE, (aszmic as u8) << 7, seq, src, dst, iv_index)
}

/// Device nonce, used with a device key
pub fn device_nonce(aszmic: bool, seq: u32, src: u16, dst: u16, iv_index: u32) -> Nonce {
    build(DEVICE_NONCE, (aszmic as u8) << 7, seq, src, dst, iv_index)
}

/// Proxy nonce, used for proxy configuration messages
pub fn proxy_nonce(seq: u32, src: u16, iv_index: u32) -> Nonce {
    build(PROXY_NONCE, 0x00, seq, src, 0x0000, iv_index)
}
