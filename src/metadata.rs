use image::io::Reader as ImageReader;
use image::GenericImageView;
use img_hash::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// 完整解码的像素上限 (约 50 兆像素)。只看文件头声明的尺寸，超过就不解码。
pub const DEFAULT_MAX_DECODE_PIXELS: u64 = 50_000_000;

/// JPEG APP1 段 / WebP 里的 EXIF 标识
const EXIF_MARKER: &[u8] = b"Exif\0\0";
/// PNG 的 eXIf chunk
const PNG_EXIF_CHUNK: &[u8] = b"eXIf";
/// C2PA 内容凭证使用 JUMBF 容器，超级盒子类型为 `jumb`，清单标签为 `c2pa`
const JUMBF_BOX: &[u8] = b"jumb";
const C2PA_LABEL: &[u8] = b"c2pa";

/// 元数据摘要 (Metadata Summary)
///
/// 这是打分的"旁路证据"，不影响正确性：解码失败、没有 EXIF，都只会让证据变弱，
/// 绝不会让请求失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSummary {
    pub byte_length: u64,
    /// 客户端声明的媒体类型 (仅供参考，不可信)
    pub declared_media_type: Option<String>,
    /// 从字节头嗅探出的图片格式，比如 `png`、`jpeg`
    pub detected_format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 视觉感知哈希 (Gradient 8x8, Base64)。
    /// 图片被压缩、转码后 SHA-256 全变，但 pHash 依然相近。
    pub perceptual_hash: Option<String>,
    /// 是否带有拍摄设备写入的 EXIF 元数据
    pub exif_present: bool,
    /// 是否嵌有 C2PA / JUMBF 来源清单
    pub provenance_manifest_present: bool,
}

impl MetadataSummary {
    /// 嗅探结果对应的 MIME 类型，声明类型缺失时用它兜底
    pub fn detected_media_type(&self) -> Option<String> {
        self.detected_format.as_ref().map(|f| match f.as_str() {
            "jpeg" => "image/jpeg".to_string(),
            "ico" => "image/x-icon".to_string(),
            other => format!("image/{other}"),
        })
    }
}

/// 提取元数据。总是成功。
pub fn extract(bytes: &[u8], declared_media_type: Option<&str>) -> MetadataSummary {
    extract_bounded(bytes, declared_media_type, DEFAULT_MAX_DECODE_PIXELS)
}

/// 同 [`extract`]，但像素上限由调用方给定。
///
/// 几百字节的文件头就能声明 60000x60000 的尺寸，解码器会照着去分配内存，
/// 分配失败直接 abort 整个进程。所以先只读头部拿尺寸，超限时跳过解码和 pHash。
pub fn extract_bounded(
    bytes: &[u8],
    declared_media_type: Option<&str>,
    max_decode_pixels: u64,
) -> MetadataSummary {
    let detected_format = image::guess_format(bytes)
        .ok()
        .map(|f| format!("{f:?}").to_lowercase());

    let header_dimensions = if detected_format.is_some() {
        read_dimensions(bytes)
    } else {
        None
    };

    let decodable = matches!(
        header_dimensions,
        Some((w, h)) if u64::from(w) * u64::from(h) <= max_decode_pixels
    );
    if let (Some((w, h)), false) = (header_dimensions, decodable) {
        tracing::warn!(width = w, height = h, max_decode_pixels, "image too large to decode, skipping pHash");
    }

    let decoded = if decodable {
        image::load_from_memory(bytes).ok()
    } else {
        None
    };

    let perceptual_hash = decoded.as_ref().map(|img| {
        // 梯度算法比均值算法对明暗变化更鲁棒；8x8 = 64 位指纹
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(8, 8)
            .to_hasher();
        hasher.hash_image(img).to_base64()
    });
    // 解码成功时以解码结果为准；否则用头部声明的尺寸
    let (width, height) = match decoded.as_ref().map(|img| img.dimensions()).or(header_dimensions) {
        Some((w, h)) => (Some(w), Some(h)),
        None => (None, None),
    };

    MetadataSummary {
        byte_length: bytes.len() as u64,
        declared_media_type: declared_media_type.map(str::to_string),
        detected_format,
        width,
        height,
        perceptual_hash,
        exif_present: contains(bytes, EXIF_MARKER) || contains(bytes, PNG_EXIF_CHUNK),
        provenance_manifest_present: contains(bytes, JUMBF_BOX) && contains(bytes, C2PA_LABEL),
    }
}

/// 只解析文件头，不分配像素缓冲
fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};

    /// 生成一张小 PNG，测试里到处要用
    pub(crate) fn tiny_png(w: u32, h: u32) -> Vec<u8> {
        let buf = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x * 30 % 256) as u8, (y * 30 % 256) as u8, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn png_is_decoded_and_hashed() {
        let png = tiny_png(8, 6);
        let meta = extract(&png, Some("image/png"));
        assert_eq!(meta.detected_format.as_deref(), Some("png"));
        assert_eq!(meta.width, Some(8));
        assert_eq!(meta.height, Some(6));
        assert!(meta.perceptual_hash.is_some());
        assert_eq!(meta.byte_length, png.len() as u64);
        assert_eq!(meta.detected_media_type().as_deref(), Some("image/png"));
        assert!(!meta.exif_present);
    }

    #[test]
    fn arbitrary_bytes_degrade_to_weak_evidence() {
        let meta = extract(b"just some text, not an image", None);
        assert_eq!(meta.detected_format, None);
        assert_eq!(meta.width, None);
        assert_eq!(meta.perceptual_hash, None);
        assert_eq!(meta.declared_media_type, None);
        assert!(!meta.provenance_manifest_present);
    }

    #[test]
    fn truncated_image_does_not_fail() {
        let png = tiny_png(8, 8);
        let meta = extract(&png[..20], Some("image/png"));
        // 文件头还在，格式能嗅探出来，但解码失败
        assert_eq!(meta.detected_format.as_deref(), Some("png"));
        assert_eq!(meta.width, None);
    }

    /// 只有文件头的 baseline JPEG：单分量，声明 60000x60000
    pub(crate) fn oversized_jpeg_header() -> Vec<u8> {
        let mut b = vec![0xFF, 0xD8];
        // DQT
        b.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        b.extend_from_slice(&[1u8; 64]);
        // SOF0: 8 bit, 60000 x 60000, 1 component
        b.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08, 0xEA, 0x60, 0xEA, 0x60, 0x01, 0x01, 0x11, 0x00]);
        // DHT: DC 0 与 AC 0，各一个长度为 1 的码字
        for class in [0x00u8, 0x10] {
            b.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, class, 0x01]);
            b.extend_from_slice(&[0u8; 15]);
            b.push(0x00);
        }
        // SOS
        b.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        b.extend_from_slice(&[0x00; 16]);
        b.extend_from_slice(&[0xFF, 0xD9]);
        b
    }

    #[test]
    fn oversized_header_is_not_decoded() {
        let bytes = oversized_jpeg_header();
        assert!(bytes.len() < 256);
        let meta = extract(&bytes, Some("image/jpeg"));
        assert_eq!(meta.detected_format.as_deref(), Some("jpeg"));
        assert_eq!(meta.perceptual_hash, None);
        assert_eq!(meta.width, Some(60000));
        assert_eq!(meta.height, Some(60000));
    }

    #[test]
    fn pixel_cap_is_configurable() {
        let png = tiny_png(8, 8);
        let capped = extract_bounded(&png, None, 63);
        assert_eq!(capped.perceptual_hash, None);
        assert_eq!(capped.width, Some(8));
        let allowed = extract_bounded(&png, None, 64);
        assert!(allowed.perceptual_hash.is_some());
    }

    #[test]
    fn capture_and_provenance_markers_are_detected() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x10];
        bytes.extend_from_slice(b"Exif\0\0MM");
        bytes.extend_from_slice(b"....jumb....c2pa.manifest");
        let meta = extract(&bytes, Some("image/jpeg"));
        assert!(meta.exif_present);
        assert!(meta.provenance_manifest_present);
    }
}
