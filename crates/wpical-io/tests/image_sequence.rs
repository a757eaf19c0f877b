use image::{GrayImage, Luma};
use wpical_io::{open_source, FrameSource, ImageSequenceSource, IoError};

fn write_frames(dir: &std::path::Path, count: u8) {
    for i in 0..count {
        let img = GrayImage::from_fn(6, 4, |x, y| Luma([i * 10 + (x + y) as u8]));
        img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
    }
}

#[test]
fn frames_are_read_in_name_order() -> Result<(), IoError> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 3);

    let mut source = ImageSequenceSource::open(dir.path())?;
    assert_eq!(source.frame_size(), (6, 4));
    assert_eq!(source.total_frames(), Some(3));

    let mut seen = Vec::new();
    while let Some(frame) = source.next_frame()? {
        assert_eq!(frame.data.len(), 24);
        seen.push((frame.index, frame.pixel(0, 0)));
    }
    assert_eq!(seen, vec![(0, Some(0)), (1, Some(10)), (2, Some(20))]);
    Ok(())
}

#[test]
fn directories_open_as_sequences() -> Result<(), IoError> {
    let dir = tempfile::tempdir()?;
    write_frames(dir.path(), 1);
    let source = open_source(dir.path())?;
    assert_eq!(source.total_frames(), Some(1));
    Ok(())
}

#[test]
fn empty_directory_is_an_error() -> Result<(), IoError> {
    let dir = tempfile::tempdir()?;
    assert!(matches!(
        ImageSequenceSource::open(dir.path()),
        Err(IoError::EmptySequence(_))
    ));
    Ok(())
}
