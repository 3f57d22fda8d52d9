//! 二维码生成（PNG data URL）

use crate::error::{AppError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

/// 二维码图片的最小边长（像素）
pub const QR_SIZE: u32 = 300;

/// 把 `content` 编码为 `data:image/png;base64,...`
pub fn render_data_url(content: &str) -> Result<String> {
    let code = QrCode::new(content.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to generate QR code: {e}")))?;

    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_SIZE, QR_SIZE)
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("Failed to encode QR code: {e}")))?;

    Ok(format!(
        "data:image/png;base64,{}",
        STANDARD.encode(png.into_inner())
    ))
}
