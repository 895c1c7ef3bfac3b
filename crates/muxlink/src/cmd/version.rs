use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("muxlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: muxlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("MUXLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("MUXLINK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: peer={}, async={}, tls={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "async"),
        cfg!(feature = "tls")
    );
    println!("frame_max_buffer: {}", muxlink_frame::DEFAULT_MAX_BUFFER);
    println!(
        "envelope_iterations: {}",
        muxlink_payload::envelope::DEFAULT_ITERATIONS
    );

    Ok(SUCCESS)
}
