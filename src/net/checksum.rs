/// Internet checksum (RFC 1071) over `data`.
///
/// The buffer is summed as big-endian 16-bit words, a trailing odd byte is
/// padded with zero on the right. The checksum field of whatever header is
/// covered must be zero when this is called.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    // two folds are enough for any buffer shorter than 128 KiB
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum += sum >> 16;

    !(sum as u16)
}
