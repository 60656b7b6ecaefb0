use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// A stream of RGB frames. Dropping the source releases the device.
pub trait FrameSource {
    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Something that can be opened into a [`FrameSource`].
pub trait FrameDevice {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// Camera selector from configuration: a V4L2 device node or a directory of
/// still images replayed in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec(pub String);

impl FrameDevice for DeviceSpec {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        let path = Path::new(&self.0);
        if path.is_dir() {
            return Ok(Box::new(ImageDirectory::open(path)?));
        }
        open_camera(&self.0)
    }
}

#[cfg(feature = "v4l")]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(v4l_camera::Camera::open(device)?))
}

#[cfg(not(feature = "v4l"))]
fn open_camera(device: &str) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("cannot open {device}: built without the `v4l` feature")
}

/// Replays image files from a directory, one per frame.
pub struct ImageDirectory {
    files: std::vec::IntoIter<PathBuf>,
}

impl ImageDirectory {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            anyhow::bail!("no image frames in {}", dir.display());
        }
        log::debug!("replaying {} frame(s) from {}", files.len(), dir.display());
        Ok(Self {
            files: files.into_iter(),
        })
    }
}

impl FrameSource for ImageDirectory {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.files.next() {
            Some(path) => {
                let img = image::open(&path)
                    .with_context(|| format!("decoding frame {}", path.display()))?;
                Ok(Some(img.to_rgb8()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "v4l")]
mod v4l_camera {
    use super::FrameSource;
    use anyhow::{Context, Result};
    use image::RgbImage;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;
    use v4l::{Device, Format, FourCC};

    pub struct Camera {
        stream: Stream<'static>,
        width: u32,
        height: u32,
        fourcc: FourCC,
    }

    impl Camera {
        pub fn open(device: &str) -> Result<Self> {
            let dev = Device::with_path(device).context("open camera")?;
            let mut fmt = dev.format().context("get format")?;
            // Prefer RGB, fallback to YUYV, else accept existing format
            let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
            fmt = dev.set_format(&desired).unwrap_or(fmt);
            if fmt.fourcc != FourCC::new(b"RGB3") {
                let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
                fmt = dev.set_format(&yuyv).unwrap_or(fmt);
            }
            let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
            log::info!(
                "camera {} streaming {}x{} {:?}",
                device,
                fmt.width,
                fmt.height,
                fmt.fourcc
            );
            Ok(Self {
                stream,
                width: fmt.width,
                height: fmt.height,
                fourcc: fmt.fourcc,
            })
        }
    }

    impl FrameSource for Camera {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            let (data, meta) = self.stream.next().context("capture frame")?;
            log::debug!("frame seq={} len={}", meta.sequence, data.len());
            let buf = match &self.fourcc.repr {
                b"RGB3" => data.to_vec(),
                b"YUYV" => super::yuyv_to_rgb(self.width, self.height, data)?,
                b"GREY" => super::grey_to_rgb(self.width, self.height, data)?,
                other => anyhow::bail!("unsupported pixel format {:?}", other),
            };
            let frame = RgbImage::from_raw(self.width, self.height, buf)
                .context("frame buffer shorter than advertised size")?;
            Ok(Some(frame))
        }
    }
}

#[cfg_attr(not(feature = "v4l"), allow(dead_code))]
fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer: {} < {}", data.len(), expected);
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

#[cfg_attr(not(feature = "v4l"), allow(dead_code))]
fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg_attr(not(feature = "v4l"), allow(dead_code))]
fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer: {} < {}", data.len(), expected);
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
