//! OpenCV-backed primitives for the vision tasks.
//!
//! Frames travel through the crate as `image::RgbImage`; these helpers move
//! them into `Mat` (RGB channel order) and back. HSV images use the 8-bit
//! OpenCV convention: hue in `0..=180`, saturation and value in `0..=255`.

use anyhow::{ensure, Context, Result};
use image::RgbImage;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Vec3b, Vec4i, Vector},
    imgproc,
    prelude::*,
};

/// Line segment in pixel coordinates, `(x1, y1)` to `(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct HoughParams {
    pub rho: f64,
    pub theta: f64,
    pub threshold: i32,
    pub min_line_length: f64,
    pub max_line_gap: f64,
}

pub fn to_mat(img: &RgbImage) -> Result<Mat> {
    let (w, h) = img.dimensions();
    let px: Vec<Vec3b> = img.pixels().map(|p| Vec3b::from_array(p.0)).collect();
    Ok(Mat::new_rows_cols_with_data(h as i32, w as i32, &px)?.try_clone()?)
}

pub fn to_rgb(mat: &Mat) -> Result<RgbImage> {
    ensure!(mat.typ() == core::CV_8UC3, "expected an 8-bit 3-channel image");
    let size = mat.size()?;
    let bytes = mat.data_bytes()?.to_vec();
    RgbImage::from_raw(size.width as u32, size.height as u32, bytes).context("image buffer size mismatch")
}

pub fn blank(width: i32, height: i32, color: [u8; 3]) -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, rgb(color))?)
}

fn rgb([r, g, b]: [u8; 3]) -> Scalar {
    Scalar::new(f64::from(r), f64::from(g), f64::from(b), 0.0)
}

pub fn to_hsv(rgb_frame: &Mat) -> Result<Mat> {
    let mut hsv = Mat::default();
    imgproc::cvt_color_def(rgb_frame, &mut hsv, imgproc::COLOR_RGB2HSV)?;
    Ok(hsv)
}

/// 255 where every channel lies within `[lower, upper]`, else 0.
pub fn in_range(hsv: &Mat, lower: [u8; 3], upper: [u8; 3]) -> Result<Mat> {
    let mut mask = Mat::default();
    core::in_range(hsv, &rgb(lower), &rgb(upper), &mut mask)?;
    Ok(mask)
}

/// Zero every row above the vertical midpoint.
pub fn keep_lower_half(img: &mut Mat) -> Result<()> {
    let size = img.size()?;
    let top = Rect::new(0, 0, size.width, size.height / 2);
    imgproc::rectangle(img, top, Scalar::all(0.0), imgproc::FILLED, imgproc::LINE_8, 0)?;
    Ok(())
}

pub fn canny(img: &Mat, low: f64, high: f64) -> Result<Mat> {
    let mut edges = Mat::default();
    imgproc::canny_def(img, &mut edges, low, high)?;
    Ok(edges)
}

pub fn hough_segments(edges: &Mat, p: &HoughParams) -> Result<Vec<Segment>> {
    let mut lines = Vector::<Vec4i>::new();
    imgproc::hough_lines_p(edges, &mut lines, p.rho, p.theta, p.threshold, p.min_line_length, p.max_line_gap)?;
    Ok(lines
        .iter()
        .map(|l| Segment { x1: l[0], y1: l[1], x2: l[2], y2: l[3] })
        .collect())
}

pub fn draw_line(img: &mut Mat, a: (i32, i32), b: (i32, i32), color: [u8; 3], width: i32) -> Result<()> {
    imgproc::line(img, Point::new(a.0, a.1), Point::new(b.0, b.1), rgb(color), width.max(1), imgproc::LINE_8, 0)?;
    Ok(())
}

/// `base * alpha + overlay + gamma`, saturating per channel.
pub fn blend(base: &Mat, overlay: &Mat, alpha: f64, gamma: f64) -> Result<Mat> {
    let mut out = Mat::default();
    core::add_weighted(base, alpha, overlay, 1.0, gamma, &mut out, -1)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gray(w: i32, h: i32, f: impl Fn(i32, i32) -> u8) -> Mat {
        let data: Vec<u8> = (0..h).flat_map(|y| (0..w).map(move |x| (x, y))).map(|(x, y)| f(x, y)).collect();
        Mat::new_rows_cols_with_data(h, w, &data).unwrap().try_clone().unwrap()
    }

    fn at(m: &Mat, x: i32, y: i32) -> u8 {
        *m.at_2d::<u8>(y, x).unwrap()
    }

    #[test]
    fn image_and_mat_agree() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 20, 30]));
        let mat = to_mat(&img).unwrap();
        assert_eq!((mat.cols(), mat.rows()), (3, 2));
        assert_eq!(to_rgb(&mat).unwrap(), img);
    }

    #[test]
    fn hsv_of_primaries() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([128, 128, 128]));
        let hsv = to_rgb(&to_hsv(&to_mat(&img).unwrap()).unwrap()).unwrap();
        let px: Vec<[u8; 3]> = hsv.pixels().map(|p| p.0).collect();
        assert_eq!(px, vec![[0, 255, 255], [60, 255, 255], [120, 255, 255], [0, 0, 128]]);
    }

    #[test]
    fn in_range_masks_blue() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        img.put_pixel(2, 0, Rgb([255, 0, 0]));
        let hsv = to_hsv(&to_mat(&img).unwrap()).unwrap();
        let mask = in_range(&hsv, [30, 40, 0], [150, 255, 255]).unwrap();
        let row: Vec<u8> = (0..4).map(|x| at(&mask, x, 0)).collect();
        assert_eq!(row, vec![0, 255, 0, 0]);
    }

    #[test]
    fn canny_finds_vertical_step() {
        let img = gray(20, 20, |x, _| if x >= 10 { 255 } else { 0 });
        let edges = canny(&img, 200.0, 400.0).unwrap();
        let cols: Vec<i32> = (0..20).filter(|&x| at(&edges, x, 10) == 255).collect();
        assert!(!cols.is_empty());
        assert!(cols.iter().all(|&x| x == 9 || x == 10), "{cols:?}");
        assert_eq!(at(&edges, 2, 10), 0);
        assert_eq!(at(&edges, 17, 10), 0);
    }

    #[test]
    fn hough_recovers_diagonal() {
        let edges = gray(60, 60, |x, y| if x == y && (5..55).contains(&x) { 255 } else { 0 });
        let params = HoughParams { rho: 1.0, theta: std::f64::consts::PI / 180.0, threshold: 10, min_line_length: 5.0, max_line_gap: 150.0 };
        let segs = hough_segments(&edges, &params).unwrap();
        assert!(!segs.is_empty());
        let s = segs[0];
        assert!((s.x2 - s.x1).abs() >= 40, "{s:?}");
        assert_eq!((s.y2 - s.y1).signum(), (s.x2 - s.x1).signum());
    }

    #[test]
    fn hough_ignores_sparse_noise() {
        let edges = gray(40, 40, |x, y| if (x, y) == (3, 7) || (x, y) == (30, 22) { 255 } else { 0 });
        let params = HoughParams { rho: 1.0, theta: std::f64::consts::PI / 180.0, threshold: 10, min_line_length: 5.0, max_line_gap: 150.0 };
        assert!(hough_segments(&edges, &params).unwrap().is_empty());
    }

    #[test]
    fn lower_half_only() {
        let mut img = gray(4, 4, |_, _| 255);
        keep_lower_half(&mut img).unwrap();
        assert_eq!(at(&img, 0, 1), 0);
        assert_eq!(at(&img, 0, 2), 255);
    }

    #[test]
    fn thick_line_and_blend() {
        let mut overlay = blank(10, 10, [0, 0, 0]).unwrap();
        draw_line(&mut overlay, (0, 5), (9, 5), [0, 255, 0], 3).unwrap();
        let img = to_rgb(&overlay).unwrap();
        assert_eq!(img.get_pixel(4, 4).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(4, 2).0, [0, 0, 0]);

        let base = blank(10, 10, [100, 100, 100]).unwrap();
        let out = to_rgb(&blend(&base, &overlay, 0.8, 1.0).unwrap()).unwrap();
        assert_eq!(out.get_pixel(4, 5).0, [81, 255, 81]);
        assert_eq!(out.get_pixel(0, 0).0, [81, 81, 81]);
    }
}
