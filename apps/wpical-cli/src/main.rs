use argh::FromArgs;
use std::path::PathBuf;

mod camera;
mod field;
mod layout;

#[derive(FromArgs, Debug)]
/// Camera and AprilTag field layout calibration
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Camera(CameraArgs),
    Field(FieldArgs),
    Combine(CombineArgs),
    Compare(CompareArgs),
}

#[derive(FromArgs, Debug)]
/// Calibrate camera intrinsics from a ChArUco board video
#[argh(subcommand, name = "camera")]
struct CameraArgs {
    /// path to the board video or image directory
    #[argh(positional)]
    video: PathBuf,
    /// number of detection workers
    #[argh(option, short = 'j', default = "8")]
    workers: usize,
    /// board square width in inches
    #[argh(option, default = "0.709")]
    square_width: f64,
    /// board marker width in inches
    #[argh(option, default = "0.551")]
    marker_width: f64,
    /// board width in squares
    #[argh(option, default = "12")]
    board_width: usize,
    /// board height in squares
    #[argh(option, default = "8")]
    board_height: usize,
    /// where to write the camera model, defaults to cameracalibration.json next to the video
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(FromArgs, Debug)]
/// Calibrate an AprilTag field layout from a directory of videos
#[argh(subcommand, name = "field")]
struct FieldArgs {
    /// directory holding the field videos
    #[argh(positional)]
    input_dir: PathBuf,
    /// camera model JSON
    #[argh(option, short = 'c')]
    camera: PathBuf,
    /// ideal field layout JSON
    #[argh(option, short = 'i')]
    ideal: PathBuf,
    /// tag whose ideal pose anchors the solve
    #[argh(option, short = 'p', default = "1")]
    pinned: i32,
    /// tag side length in inches
    #[argh(option, default = "6.5")]
    tag_size: f64,
    /// use every n-th frame
    #[argh(option, default = "1")]
    stride: usize,
    /// output directory
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output: PathBuf,
    /// log the tags found in every frame
    #[argh(switch)]
    show_debug: bool,
}

#[derive(FromArgs, Debug)]
/// Build one layout from tags picked out of several calibrations
#[argh(subcommand, name = "combine")]
struct CombineArgs {
    /// ideal field layout JSON
    #[argh(option, short = 'i')]
    ideal: PathBuf,
    /// tag to include as `id` (ideal pose) or `id=layout.json`, repeatable
    #[argh(option, short = 't')]
    tag: Vec<String>,
    /// tag side length in inches, for the fmap export
    #[argh(option, default = "6.5")]
    tag_size: f64,
    /// output directory
    #[argh(option, short = 'o', default = "PathBuf::from(\".\")")]
    output: PathBuf,
}

#[derive(FromArgs, Debug)]
/// Report how a calibrated tag differs from the ideal layout
#[argh(subcommand, name = "compare")]
struct CompareArgs {
    /// ideal field layout JSON
    #[argh(option, short = 'i')]
    ideal: PathBuf,
    /// calibrated field layout JSON
    #[argh(option, short = 'c')]
    calibrated: PathBuf,
    /// tag to inspect
    #[argh(option, short = 'f')]
    focused: i32,
    /// tag to measure the focused tag against
    #[argh(option, short = 'r')]
    reference: i32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    match args.command {
        Command::Camera(args) => camera::run(args),
        Command::Field(args) => field::run(args),
        Command::Combine(args) => layout::combine(args),
        Command::Compare(args) => layout::compare(args),
    }
}
