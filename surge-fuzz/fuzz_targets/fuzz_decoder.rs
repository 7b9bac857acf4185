#![no_main]

use libfuzzer_sys::fuzz_target;
use surge_codec::{
    ByteOrder, Codec, DelimiterCodec, LengthFieldCodec, LengthFieldConfig, LineCodec,
};

const WIDTHS: [usize; 5] = [1, 2, 3, 4, 8];

/// Decode `data` to exhaustion, checking every frame stays inside the input.
fn drain(codec: &dyn Codec, data: &[u8]) {
    let mut rest = data;
    while let Ok(Some(frame)) = codec.decode(rest) {
        assert!(frame.consumed > 0 && frame.consumed <= rest.len());
        assert!(frame.payload.len() <= frame.consumed);
        rest = &rest[frame.consumed..];
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks a length-field layout, the rest is the stream
    let selector = data[0];
    let stream = &data[1..];

    let width = WIDTHS[usize::from(selector % 5)];
    let order = if selector & 0x80 == 0 {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    };
    let cfg = LengthFieldConfig::new(width)
        .with_byte_order(order)
        .with_offset(usize::from((selector >> 3) & 0x03))
        .with_adjustment(i64::from((selector >> 5) & 0x03) - 1)
        .with_length_includes_header(selector & 0x40 != 0)
        .with_max_frame_length(1 << 20);

    drain(&LengthFieldCodec::new(cfg), stream);
    drain(&LineCodec::with_max_length(1024), stream);
    drain(&DelimiterCodec::new(selector), stream);
});
