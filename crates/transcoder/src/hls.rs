/// HLS playlist and segment content-type helpers.

/// Content-Type for HLS master/variant playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content-Type for MPEG-TS segments.
pub const SEGMENT_CONTENT_TYPE_TS: &str = "video/MP2T";

/// Content-Type for fMP4 segments.
pub const SEGMENT_CONTENT_TYPE_MP4: &str = "video/mp4";

/// Name ffmpeg is told to write the playlist under.
pub const INDEX_FILENAME: &str = "stream.m3u8";

pub fn is_playlist(filename: &str) -> bool {
    filename.ends_with(".m3u8") || filename.ends_with(".m3u")
}

/// Determine the content type of a file in an output area from its extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("m3u8" | "m3u") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => SEGMENT_CONTENT_TYPE_TS,
        Some("m4s" | "mp4") => SEGMENT_CONTENT_TYPE_MP4,
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
