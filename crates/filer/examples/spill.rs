// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates the memory-to-disk spill boundary of a `BufferFile`.

use std::io::SeekFrom;

use filer::Filer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> filer::Result<()> {
    let filer = Filer::new(16);

    // First 32 bytes live in memory; no descriptor is held.
    let mut buffer = filer.buffer_file(32);
    buffer.write(b"this fits in the memory prefix").await?;
    println!("spilled: {} (handles: {})", buffer.spilled(), filer.open_handles());

    // Crossing the cap materialises a temporary spill file.
    buffer.write(b" and this part spills to disk").await?;
    println!("spilled: {} (handles: {})", buffer.spilled(), filer.open_handles());

    buffer.seek(SeekFrom::Start(0)).await?;
    let mut contents = vec![0u8; usize::try_from(buffer.len()).unwrap()];
    let mut filled = 0;
    while filled < contents.len() {
        filled += buffer.read(&mut contents[filled..]).await?;
    }
    println!("contents: {}", String::from_utf8_lossy(&contents));

    // Close unlinks the spill file and returns its descriptor token.
    buffer.close().await?;
    println!("handles after close: {}", filer.open_handles());

    filer.shutdown(std::future::pending()).await
}
