/// A compact box with `body`.
pub fn boxed(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + body.len());
    data.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
    data.extend_from_slice(tag);
    data.extend_from_slice(body);
    data
}

/// A version 0 full box body holding `fields` as 32-bit words.
pub fn full_box(fields: &[u32]) -> Vec<u8> {
    let mut data = vec![0; 4];
    for field in fields {
        data.extend_from_slice(&field.to_be_bytes());
    }
    data
}
