use crate::cli::ProfilesArgs;
use crate::exit_codes;
use crate::output;
use eegstream::DeviceProfile;
use serde::Serialize;

#[derive(Serialize)]
struct ProfileInfo {
    name: String,
    channels: Vec<String>,
    frontal_pair: [String; 2],
}

pub fn execute(args: ProfilesArgs) -> i32 {
    let profiles: Vec<ProfileInfo> = [DeviceProfile::Muse, DeviceProfile::Crown]
        .iter()
        .map(|profile| {
            let channels = profile.channel_names();
            let (a, b) = profile.frontal_pair();
            ProfileInfo {
                name: profile.name(),
                frontal_pair: [channels[a].clone(), channels[b].clone()],
                channels,
            }
        })
        .collect();

    if args.json {
        return output::print_json(&profiles, false);
    }

    println!("Device profiles:\n");
    println!("  {:<10} {:<14} Channels", "Name", "Frontal pair");
    println!("  {}", "-".repeat(60));
    for p in &profiles {
        println!(
            "  {:<10} {:<14} {}",
            p.name,
            p.frontal_pair.join("/"),
            p.channels.join(", ")
        );
    }
    println!();
    println!("Any other headset: generic-N (N numbered channels, frontal pair channel0/channel1)");

    exit_codes::SUCCESS
}
