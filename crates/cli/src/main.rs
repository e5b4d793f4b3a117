//! `resolveq`: a command-line DNS lookup tool built on `dns-resolver-core`.
//! Grounded in the teacher's `dnsq` binary, minus zone/hosts-file
//! configuration (this core has no authoritative-serving mode).

use std::net::{Ipv4Addr, SocketAddr};
use std::process;

use clap::Parser;

use dns_proto::protocol::types::{DomainName, QueryType, RecordType, ResourceRecord};
use dns_resolver_core::{IpVersion, Mode, ResolvedAnswer, ResolverConfig, Resolver, ServerSpec};

fn rdata_to_string(rr: &ResourceRecord) -> String {
    use dns_proto::protocol::types::RecordTypeWithData::*;
    match &rr.rtype_with_data {
        A { address } => address.to_string(),
        AAAA { address } => address.to_string(),
        NS { nsdname } => nsdname.to_string(),
        CNAME { cname } => cname.to_string(),
        SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
        TXT { octets } => format!("{octets:?}"),
        Unknown { tag, octets } => format!("TYPE{} ({} bytes)", tag.0, octets.len()),
    }
}

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }
    println!("\n;; {heading}");
    for rr in rrs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.rtype_with_data.rtype(),
            rdata_to_string(rr)
        );
    }
}

/// DNS lookup utility, recursive by default.
#[derive(Parser)]
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Act as a forwarding resolver: send the query to this server
    /// instead of performing recursive resolution ourselves
    #[clap(short, long)]
    forward_address: Option<Ipv4Addr>,

    /// Only use IPv4 when chasing delegation glue during recursion
    #[clap(long)]
    ipv4_only: bool,

    /// Print resolver-internal debug logs
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let mut config = ResolverConfig::default();
    if args.ipv4_only {
        config.ip_version = IpVersion::V4Only;
    }

    let resolver = match args.forward_address {
        Some(address) => Resolver::new(
            config,
            Mode::Forwarding {
                servers: vec![ServerSpec::new(
                    "forward-address",
                    SocketAddr::new(address.into(), 53),
                    std::time::Duration::from_secs(5),
                    0,
                )],
            },
        ),
        None => Resolver::recursive_with_default_hints(config),
    };

    println!(";; QUESTION");
    println!("{}\tIN\t{}", args.domain, args.qtype);

    let (_metrics, result) = resolver.resolve(args.domain, args.qtype).await;

    match result {
        Ok(ResolvedAnswer::Answer { rrs, authority_rrs }) => {
            print_section("ANSWER", &rrs);
            print_section("AUTHORITY", &authority_rrs);
        }
        Ok(ResolvedAnswer::NameError { authority_rrs }) => {
            println!("\n;; ANSWER");
            println!("; name does not exist");
            let soa = authority_rrs
                .iter()
                .find(|rr| matches!(rr.rtype_with_data, dns_proto::protocol::types::RecordTypeWithData::SOA { .. }));
            if let Some(soa) = soa {
                println!("; soa: {}", rdata_to_string(soa));
            }
            print_section("AUTHORITY", &authority_rrs);
        }
        Err(err) => {
            println!("\n;; ANSWER");
            println!("; {err}");
            process::exit(1);
        }
    }
}
