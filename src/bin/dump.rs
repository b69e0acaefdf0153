//! LSVD Object Dump
//!
//! Prints the headers and tables of a sealed backend object.

use std::fmt::Display;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use lsvd::backend::{decode_object, ObjectBody, ParsedObject};
use lsvd::codec::{Table, LSVD_MAGIC};
use tracing_subscriber::{fmt, EnvFilter};

/// LSVD object dump
#[derive(Parser, Debug)]
#[command(name = "lsvd-dump")]
#[command(about = "Print the contents of an LSVD backend object")]
#[command(version)]
struct Args {
    /// Object file to read
    path: PathBuf,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let bytes = match fs::read(&args.path) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to read {}: {}", args.path.display(), e);
            std::process::exit(1);
        }
    };

    match decode_object(&bytes) {
        Ok(obj) => print_object(&args.path.display().to_string(), &obj, bytes.len()),
        Err(e) => {
            tracing::error!("Failed to decode {}: {}", args.path.display(), e);
            std::process::exit(1);
        }
    }
}

fn print_object(name: &str, obj: &ParsedObject, size: usize) {
    let h = &obj.header;
    println!("name:      {}", name);
    println!(
        "magic:     {}",
        if h.magic == LSVD_MAGIC { "OK" } else { "**BAD**" }
    );
    println!("version:   {}", h.version);
    println!("type:      {}", obj.kind());
    println!("seq:       {}", h.seq);
    println!("n_hdr:     {}", h.hdr_sectors);
    println!("n_data:    {}", h.data_sectors);

    match &obj.body {
        ObjectBody::Super {
            header,
            ckpts,
            snaps,
            clones,
        } => {
            println!("vol_size:  {}", header.vol_size);
            println!("total:     {}", header.total_sectors);
            println!("live:      {}", header.live_sectors);
            println!("next_obj:  {}", header.next_obj);
            println!("ckpts:     {} : {}", ckpts.offset, render(ckpts, size, |c| c.to_string()));
            println!(
                "snaps:     {} : {}",
                snaps.offset,
                render(snaps, size, |s| format!("[{} @{}]", s.snap_uuid, s.seq))
            );
            println!(
                "clones:    {} : {}",
                clones.offset,
                render(clones, size, |c| format!("[{} {} @{}]", c.name(), c.base_uuid, c.seq))
            );
        }
        ObjectBody::Data {
            header,
            ckpts,
            objs_cleaned,
            map,
        } => {
            println!("last_data: {}", header.last_data_obj);
            println!("ckpts:     {} : {}", ckpts.offset, render(ckpts, size, |c| c.to_string()));
            println!(
                "cleaned:   {} : {}",
                objs_cleaned.offset,
                render(objs_cleaned, size, |o| format!("[{} {}]", o.seq, o.was_deleted))
            );
            println!(
                "map:       {} : {}",
                map.offset,
                render(map, size, |m| format!("[{} {}]", m.lba, m.len))
            );
        }
        ObjectBody::Checkpoint {
            ckpts,
            objs,
            deletes,
            map,
            ..
        } => {
            println!("ckpts:     {} : {}", ckpts.offset, render(ckpts, size, |c| c.to_string()));
            println!(
                "objs:      {} : {}",
                objs.offset,
                render(objs, size, |o| format!(
                    "[obj={} hdr={} data={} live={}]",
                    o.seq, o.hdr_sectors, o.data_sectors, o.live_sectors
                ))
            );
            println!(
                "deletes:   {} : {}",
                deletes.offset,
                render(deletes, size, |d| format!("[{} @{}]", d.seq, d.time))
            );
            println!(
                "map:       {} : {}",
                map.offset,
                render(map, size, |m| format!(
                    "[{}+{} -> {}+{}]",
                    m.lba, m.len, m.obj, m.offset
                ))
            );
        }
    }
}

fn render<T, F, S>(table: &Table<T>, size: usize, f: F) -> String
where
    F: Fn(&T) -> S,
    S: Display,
{
    match table.entries() {
        Ok(entries) => entries
            .iter()
            .map(|e| f(e).to_string())
            .collect::<Vec<_>>()
            .join(", "),
        Err(e) => format!("OBJECT TOO SHORT ({} bytes): {}", size, e),
    }
}
