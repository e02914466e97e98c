use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{value_parser, Arg, ArgAction, Command, ValueEnum};
use image::{imageops::FilterType, DynamicImage};
use pixelart::{
    DitherMethod, DownscaleMode, Execution, OutlinePixelizer, PixelBuffer, PixelizeConfig,
    Pixelizer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(ValueEnum, Clone, Debug)]
enum DownscaleArg {
    Contrast,
    KCentroid,
    Nearest,
    Bilinear,
    Lanczos,
}

#[derive(ValueEnum, Clone, Debug)]
enum DitherArg {
    None,
    Ordered,
    ErrorDiffusion,
}

fn main() -> Result<(), Box<dyn Error>> {
    let defaults = PixelizeConfig::default();
    let matches = Command::new("pixelize")
        .version("0.1")
        .about("Turn an image into pixel art.")
        .arg(
            Arg::new("input")
                .help("Sets the input file to use")
                .required(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Sets the output file. Defaults to <input>_pixelized.png"),
        )
        .arg(
            Arg::new("thickness")
                .short('t')
                .long("thickness")
                .help("Outline expansion erode/dilate iterations. 0 disables the expansion.")
                .value_name("UINT")
                .value_parser(value_parser!(u32))
                .default_value(defaults.thickness.to_string()),
        )
        .arg(
            Arg::new("patch_size")
                .long("patch-size")
                .help("Side of the local contrast statistics window.")
                .value_name("UINT")
                .value_parser(value_parser!(u32).range(1..))
                .default_value(defaults.patch_size.to_string()),
        )
        .arg(
            Arg::new("avg_scale")
                .long("avg-scale")
                .help("Weight of the neighbourhood brightness in the expansion weights.")
                .value_name("FLOAT")
                .value_parser(value_parser!(f32))
                .default_value(defaults.avg_scale.to_string()),
        )
        .arg(
            Arg::new("dist_scale")
                .long("dist-scale")
                .help("Weight of the neighbourhood contrast skew in the expansion weights.")
                .value_name("FLOAT")
                .value_parser(value_parser!(f32))
                .default_value(defaults.dist_scale.to_string()),
        )
        .arg(
            Arg::new("downscale")
                .long("downscale")
                .help("The downscale method to use.")
                .action(ArgAction::Set)
                .value_name("MODE")
                .value_parser(value_parser!(DownscaleArg))
                .default_value("contrast")
                .conflicts_with("no_downscale"),
        )
        .arg(
            Arg::new("no_downscale")
                .long("no-downscale")
                .help("Keep the input resolution.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("target_size")
                .short('s')
                .long("target-size")
                .help("Side of a square with the pixel count of the output.")
                .value_name("UINT")
                .value_parser(value_parser!(u32).range(1..))
                .default_value(defaults.target_size.to_string()),
        )
        .arg(
            Arg::new("k_centroids")
                .long("k-centroids")
                .help("Clusters per block for the k-centroid downscale.")
                .value_name("UINT")
                .value_parser(value_parser!(usize))
                .default_value(defaults.k_centroids.to_string()),
        )
        .arg(
            Arg::new("quantize")
                .short('q')
                .long("quantize")
                .help("Reduce the output to a limited palette.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("num_colors")
                .short('k')
                .long("num-colors")
                .help("The number of colors used for the output.")
                .value_name("UINT")
                .value_parser(value_parser!(usize))
                .default_value(defaults.num_colors.to_string()),
        )
        .arg(
            Arg::new("dither")
                .short('d')
                .long("dither")
                .help("The dither method used when quantizing.")
                .action(ArgAction::Set)
                .value_name("METHOD")
                .value_parser(value_parser!(DitherArg))
                .default_value("none"),
        )
        .arg(
            Arg::new("bayer_size")
                .long("bayer-size")
                .help("Side of the ordered dither matrix, a power of two up to 256.")
                .value_name("UINT")
                .value_parser(value_parser!(u32))
                .default_value(defaults.bayer_size.to_string()),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .help("Spread per-row work over all cores.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("upscale")
                .short('u')
                .long("upscale")
                .help("Nearest-neighbour upscale factor applied before saving.")
                .value_name("UINT")
                .value_parser(value_parser!(u32).range(1..))
                .default_value("1"),
        )
        .arg(
            Arg::new("weights")
                .long("weights")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Also save the outline expansion weight map as a grayscale image."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Prints debug information verbosely.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"));

    // required and defaulted arguments are always present
    let input_path = matches.get_one::<PathBuf>("input").ok_or("missing input")?;
    let downscale_mode = if matches.get_flag("no_downscale") {
        None
    } else {
        matches.get_one::<DownscaleArg>("downscale").map(|mode| match mode {
            DownscaleArg::Contrast => DownscaleMode::Contrast,
            DownscaleArg::KCentroid => DownscaleMode::KCentroid,
            DownscaleArg::Nearest => DownscaleMode::Nearest,
            DownscaleArg::Bilinear => DownscaleMode::Bilinear,
            DownscaleArg::Lanczos => DownscaleMode::Lanczos,
        })
    };
    let dither_method = match matches.get_one::<DitherArg>("dither") {
        Some(DitherArg::Ordered) => DitherMethod::Ordered,
        Some(DitherArg::ErrorDiffusion) => DitherMethod::ErrorDiffusion,
        Some(DitherArg::None) | None => DitherMethod::None,
    };
    let config = PixelizeConfig {
        thickness: *matches.get_one::<u32>("thickness").unwrap_or(&defaults.thickness),
        patch_size: *matches.get_one::<u32>("patch_size").unwrap_or(&defaults.patch_size),
        avg_scale: *matches.get_one::<f32>("avg_scale").unwrap_or(&defaults.avg_scale),
        dist_scale: *matches.get_one::<f32>("dist_scale").unwrap_or(&defaults.dist_scale),
        downscale_mode,
        target_size: *matches.get_one::<u32>("target_size").unwrap_or(&defaults.target_size),
        k_centroids: *matches.get_one::<usize>("k_centroids").unwrap_or(&defaults.k_centroids),
        quantize: matches.get_flag("quantize"),
        num_colors: *matches.get_one::<usize>("num_colors").unwrap_or(&defaults.num_colors),
        dither_method,
        bayer_size: *matches.get_one::<u32>("bayer_size").unwrap_or(&defaults.bayer_size),
        execution: if matches.get_flag("parallel") {
            Execution::Parallel
        } else {
            Execution::Sequential
        },
    };
    let upscale = *matches.get_one::<u32>("upscale").unwrap_or(&1);

    info!("Using input file: {}", input_path.display());
    let img_src = image::open(input_path)?;
    let buffer = PixelBuffer::from(&img_src);

    let stylized = OutlinePixelizer::new(config).pixelize(&buffer)?;
    let (w, h) = stylized.image.dimensions();
    info!("Output size: {}x{}", w, h);
    if let Some(palette) = &stylized.palette {
        info!("Palette: {} colors", palette.len());
    }

    let output = if upscale > 1 {
        let (uw, uh) = upscaled_dimensions(w, h, upscale)
            .ok_or_else(|| format!("upscaling {w}x{h} by {upscale} overflows"))?;
        stylized.image.resize(uw, uh, FilterType::Nearest)
    } else {
        stylized.image
    };

    let output_path = match matches.get_one::<PathBuf>("output") {
        Some(path) => path.clone(),
        None => default_output_path(input_path),
    };
    DynamicImage::from(output).save(&output_path)?;
    info!("Saved pixelized image to {}", output_path.display());

    if let Some(weights_path) = matches.get_one::<PathBuf>("weights") {
        match &stylized.weights {
            Some(weights) => {
                weights.to_gray_image().save(weights_path)?;
                info!("Saved weight map to {}", weights_path.display());
            }
            None => info!("No weight map: outline expansion was disabled"),
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "pixelart=debug,pixelize=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}

fn upscaled_dimensions(width: u32, height: u32, factor: u32) -> Option<(u32, u32)> {
    Some((width.checked_mul(factor)?, height.checked_mul(factor)?))
}

fn default_output_path(input_path: &Path) -> PathBuf {
    let file_stem = input_path.file_stem().unwrap_or_default();
    let mut new_name = file_stem.to_os_string();
    new_name.push("_pixelized.png");
    input_path.with_file_name(new_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("art/ferris.jpg")),
            PathBuf::from("art/ferris_pixelized.png")
        );
    }

    #[test]
    fn upscale_overflow_is_an_error() {
        assert_eq!(upscaled_dimensions(32, 24, 4), Some((128, 96)));
        assert_eq!(upscaled_dimensions(32, 24, u32::MAX), None);
    }
}
