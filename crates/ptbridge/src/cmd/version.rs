use ptbridge_server::VersionInfo;
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ExtendedVersion {
    #[serde(flatten)]
    versions: VersionInfo,
    target: &'static str,
    profile: &'static str,
    os: &'static str,
    arch: &'static str,
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let versions = VersionInfo::current();
    if !args.extended {
        match format {
            OutputFormat::Json => print_json(&versions),
            _ => println!("ptbridge {}", versions.driver),
        }
        return Ok(SUCCESS);
    }

    let out = ExtendedVersion {
        versions,
        target: option_env!("PTBRIDGE_BUILD_TARGET").unwrap_or("unknown"),
        profile: option_env!("PTBRIDGE_BUILD_PROFILE").unwrap_or("unknown"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => {
            println!("name: ptbridge");
            println!("version: {}", out.versions.driver);
            println!("j2534_api: {}", out.versions.api);
            println!("firmware: {}", out.versions.firmware);
            println!("target: {}", out.target);
            println!("profile: {}", out.profile);
            println!("target_os: {}", out.os);
            println!("target_arch: {}", out.arch);
        }
    }
    Ok(SUCCESS)
}
