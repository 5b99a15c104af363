use argparse::{ArgumentParser, Store, StoreTrue};
use kitserv::{RequestContext, ServerConfig};
use std::process::exit;

fn main() {
    env_logger::init();

    let mut webdir = String::new();
    let mut port = 8012u16;
    let mut slots = 128usize;
    let mut threads = 2usize;
    let mut fallback = String::from("200.html");
    let mut root_fallback = String::from("index.html");
    let mut only_ipv4 = false;
    let mut only_ipv6 = false;

    {
        let mut parser = ArgumentParser::new();
        parser.set_description("Small static-file and API server.");
        parser
            .refer(&mut webdir)
            .add_option(&["-w"], Store, "Root directory from which to serve files")
            .required();
        parser
            .refer(&mut port)
            .add_option(&["-p"], Store, "Port to run on (default: 8012)");
        parser.refer(&mut slots).add_option(
            &["-s"],
            Store,
            "Number of connection slots to allocate (default: 128)",
        );
        parser.refer(&mut threads).add_option(
            &["-t"],
            Store,
            "Number of worker threads to use for serving clients (default: 2)",
        );
        parser.refer(&mut fallback).add_option(
            &["-f"],
            Store,
            "Path to fallback resource (default: 200.html)",
        );
        parser.refer(&mut root_fallback).add_option(
            &["-r"],
            Store,
            "Path to fallback resource when the path is / (default: index.html)",
        );
        parser
            .refer(&mut only_ipv4)
            .add_option(&["-4"], StoreTrue, "Bind IPv4 only");
        parser.refer(&mut only_ipv6).add_option(
            &["-6"],
            StoreTrue,
            "Bind IPv6 only, or both when dual binding is enabled (falls back to IPv4 if no IPv6)",
        );
        match parser.parse_args() {
            Ok(()) => {}
            Err(0) => exit(0),
            Err(_) => exit(1),
        }
    }

    if slots < 1 {
        eprintln!("Invalid slot count ({slots}).");
        exit(1);
    }
    if threads < 1 {
        eprintln!("Invalid worker count ({threads}).");
        exit(1);
    }

    let mut config = ServerConfig::new(RequestContext {
        root: webdir.clone().into(),
        root_fallback: Some(root_fallback),
        fallback: Some(fallback),
        use_html_append_fallback: true,
    });
    config.port = port;
    config.slots = slots;
    config.workers = threads;
    config.bind_ipv4 = !only_ipv6;
    config.bind_ipv6 = !only_ipv4;

    println!("Starting on port {port}.");
    println!("Web root:  {webdir}");

    if let Err(e) = kitserv::server_start(config) {
        eprintln!("kitserv: {e}");
        exit(1);
    }

    println!("Kitserv shutting down.");
}
