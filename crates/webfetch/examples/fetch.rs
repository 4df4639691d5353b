// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fetches one URL twice, showing the second hit served by the cache.

use std::collections::HashMap;
use std::sync::Mutex;

use filer::{BufferFile, Filer};
use futures::future::BoxFuture;
use webfetch::{BoxError, CacheStore, Client, Request, ReqwestTransport, SectionReader, TracingSink};

/// A minimal in-memory implementation of the cache contract.
#[derive(Default)]
struct MemCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl CacheStore for MemCache {
    fn get<'a>(&'a self, url: &'a str, sink: &'a mut BufferFile) -> BoxFuture<'a, Result<bool, BoxError>> {
        Box::pin(async move {
            let cached = self.entries.lock().unwrap().get(url).cloned();
            match cached {
                None => Ok(false),
                Some(bytes) => {
                    sink.write(&bytes).await.map_err(BoxError::from)?;
                    Ok(true)
                }
            }
        })
    }

    fn put<'a>(&'a self, url: &'a str, mut source: SectionReader<'a>, len: u64) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let bytes = source.read_to_end().await.map_err(BoxError::from)?;
            if bytes.len() as u64 != len {
                return Err("length mismatch".into());
            }
            self.entries.lock().unwrap().insert(url.to_owned(), bytes);
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "https://example.com/".to_owned());

    let filer = Filer::new(0);
    let client = Client::builder(ReqwestTransport::default(), filer)
        .cache(MemCache::default())
        .log_sink(TracingSink)
        .build();

    let request = Request::builder().uri(url.as_str()).body(())?;
    let first = client.execute(request).await?;
    let status = first.status();
    let first_body = first.bytes().await?;
    println!("first fetch:  {status} ({} bytes)", first_body.len());

    let request = Request::builder().uri(url.as_str()).body(())?;
    let second = client.execute(request).await?;
    println!("second fetch: {} (served from cache)", second.status());
    let second_body = second.bytes().await?;
    assert_eq!(first_body, second_body);

    client.shutdown(std::future::pending()).await?;
    Ok(())
}
