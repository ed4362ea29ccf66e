//! Shared MPD document structure

use crate::error::ResolveError;
use crate::platform::formats::{FormatDescriptor, MediaType};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;

pub(crate) type XmlWriter = Writer<Vec<u8>>;

/// Render a duration in milliseconds as `PT<s>.<ms>S`
pub fn format_duration(duration_ms: u64) -> String {
    format!("PT{}.{:03}S", duration_ms / 1000, duration_ms % 1000)
}

/// Write a complete manifest for one representation
///
/// `segment_info` writes the segment addressing children of the representation.
pub(crate) fn write_manifest<F>(
    format: &FormatDescriptor,
    duration_ms: u64,
    segment_info: F,
) -> Result<String, ResolveError>
where
    F: FnOnce(&mut XmlWriter) -> Result<(), ResolveError>,
{
    check_representation(format)?;

    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))
        .map_err(xml_error)?;

    let duration = format_duration(duration_ms);
    start(
        &mut writer,
        "MPD",
        &[
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ("xmlns", "urn:mpeg:DASH:schema:MPD:2011"),
            (
                "xsi:schemaLocation",
                "urn:mpeg:DASH:schema:MPD:2011 DASH-MPD.xsd",
            ),
            ("minBufferTime", "PT1.500S"),
            ("profiles", "urn:mpeg:dash:profile:full:2011"),
            ("type", "static"),
            ("mediaPresentationDuration", &duration),
        ],
    )?;
    start(&mut writer, "Period", &[])?;
    start(
        &mut writer,
        "AdaptationSet",
        &[
            ("id", "0"),
            ("mimeType", format.mime_type()),
            ("subsegmentAlignment", "true"),
        ],
    )?;
    empty(
        &mut writer,
        "Role",
        &[("schemeIdUri", "urn:mpeg:DASH:role:2011"), ("value", "main")],
    )?;

    let id = format.id.to_string();
    let bandwidth = format.bandwidth().to_string();
    let mut attributes: Vec<(&str, String)> = vec![
        ("id", id),
        ("codecs", format.codec.to_string()),
        ("startWithSAP", "1".to_string()),
        ("maxPlayoutRate", "1".to_string()),
        ("bandwidth", bandwidth),
    ];
    if format.media_type.has_video() {
        if let Some(width) = format.width {
            attributes.push(("width", width.to_string()));
        }
        if let Some(height) = format.height {
            attributes.push(("height", height.to_string()));
        }
        if let Some(fps) = format.fps.filter(|fps| *fps > 0) {
            attributes.push(("frameRate", fps.to_string()));
        }
    }
    if format.media_type == MediaType::AudioOnly {
        if let Some(rate) = format.audio_sample_rate.filter(|rate| *rate > 0) {
            attributes.push(("audioSamplingRate", rate.to_string()));
        }
    }
    let borrowed: Vec<(&str, &str)> = attributes.iter().map(|(k, v)| (*k, v.as_str())).collect();
    start(&mut writer, "Representation", &borrowed)?;

    if format.media_type == MediaType::AudioOnly {
        let channels = format
            .audio_channels
            .filter(|channels| *channels > 0)
            .map(|channels| channels.to_string())
            .ok_or(ResolveError::IncompleteMetadata {
                itag: format.id,
                missing: "audio channel count",
            })?;
        empty(
            &mut writer,
            "AudioChannelConfiguration",
            &[
                (
                    "schemeIdUri",
                    "urn:mpeg:dash:23003:3:audio_channel_configuration:2011",
                ),
                ("value", &channels),
            ],
        )?;
    }

    segment_info(&mut writer)?;

    end(&mut writer, "Representation")?;
    end(&mut writer, "AdaptationSet")?;
    end(&mut writer, "Period")?;
    end(&mut writer, "MPD")?;

    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

fn check_representation(format: &FormatDescriptor) -> Result<(), ResolveError> {
    let missing = if format.codec.is_empty() {
        Some("codec")
    } else if format.bitrate_hint == 0 {
        Some("bitrate")
    } else if format.media_type.has_video() && format.width.is_none() && format.height.is_none() {
        Some("video dimensions")
    } else {
        None
    };
    match missing {
        Some(missing) => Err(ResolveError::IncompleteMetadata {
            itag: format.id,
            missing,
        }),
        None => Ok(()),
    }
}

pub(crate) fn start(writer: &mut XmlWriter, name: &str, attributes: &[(&str, &str)]) -> Result<(), ResolveError> {
    let mut element = BytesStart::new(name);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer.write_event(Event::Start(element)).map_err(xml_error)
}

pub(crate) fn empty(writer: &mut XmlWriter, name: &str, attributes: &[(&str, &str)]) -> Result<(), ResolveError> {
    let mut element = BytesStart::new(name);
    for attribute in attributes {
        element.push_attribute(*attribute);
    }
    writer.write_event(Event::Empty(element)).map_err(xml_error)
}

pub(crate) fn end(writer: &mut XmlWriter, name: &str) -> Result<(), ResolveError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

pub(crate) fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), ResolveError> {
    start(writer, name, &[])?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    end(writer, name)
}

fn xml_error<E: Display>(err: E) -> ResolveError {
    ResolveError::Manifest(err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::formats::lookup;
    use quick_xml::Reader;

    /// Element names in document order, with their attributes
    pub(crate) fn elements(xml: &str) -> Vec<(String, Vec<(String, String)>)> {
        let mut reader = Reader::from_str(xml);
        let mut found = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let attributes = e
                        .attributes()
                        .flatten()
                        .map(|attr| {
                            (
                                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                                attr.unescape_value().unwrap_or_default().into_owned(),
                            )
                        })
                        .collect();
                    found.push((name, attributes));
                }
                Ok(Event::Eof) => break,
                Err(e) => panic!("invalid manifest: {}", e),
                _ => {}
            }
        }
        found
    }

    pub(crate) fn attribute<'a>(
        elements: &'a [(String, Vec<(String, String)>)],
        element: &str,
        name: &str,
    ) -> Option<&'a str> {
        elements
            .iter()
            .find(|(tag, _)| tag == element)
            .and_then(|(_, attrs)| attrs.iter().find(|(k, _)| k == name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "PT0.000S");
        assert_eq!(format_duration(200_000), "PT200.000S");
        assert_eq!(format_duration(61_005), "PT61.005S");
    }

    #[test]
    fn test_common_structure_for_audio() {
        let format = lookup(140).unwrap();
        let xml = write_manifest(&format, 61_005, |_| Ok(())).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?><MPD "#));

        let found = elements(&xml);
        let names: Vec<&str> = found.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "MPD",
                "Period",
                "AdaptationSet",
                "Role",
                "Representation",
                "AudioChannelConfiguration"
            ]
        );
        assert_eq!(attribute(&found, "MPD", "mediaPresentationDuration"), Some("PT61.005S"));
        assert_eq!(attribute(&found, "MPD", "minBufferTime"), Some("PT1.500S"));
        assert_eq!(attribute(&found, "AdaptationSet", "mimeType"), Some("audio/mp4"));
        assert_eq!(attribute(&found, "Role", "value"), Some("main"));
        assert_eq!(attribute(&found, "Representation", "bandwidth"), Some("128000"));
        assert_eq!(attribute(&found, "Representation", "audioSamplingRate"), Some("44100"));
        assert_eq!(attribute(&found, "Representation", "width"), None);
        assert_eq!(attribute(&found, "AudioChannelConfiguration", "value"), Some("2"));
    }

    #[test]
    fn test_video_representation_attributes() {
        let format = lookup(299).unwrap();
        let xml = write_manifest(&format, 1000, |_| Ok(())).unwrap();
        let found = elements(&xml);
        assert_eq!(attribute(&found, "Representation", "width"), Some("1920"));
        assert_eq!(attribute(&found, "Representation", "height"), Some("1080"));
        assert_eq!(attribute(&found, "Representation", "frameRate"), Some("60"));
        assert_eq!(attribute(&found, "Representation", "audioSamplingRate"), None);
        assert!(found.iter().all(|(name, _)| name != "AudioChannelConfiguration"));
    }

    #[test]
    fn test_missing_metadata_is_reported() {
        let mut format = lookup(251).unwrap();
        format.audio_channels = None;
        let err = write_manifest(&format, 1000, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ResolveError::IncompleteMetadata { itag: 251, .. }));

        let silent = lookup(137).unwrap().with_bitrate(0);
        assert!(matches!(
            write_manifest(&silent, 1000, |_| Ok(())),
            Err(ResolveError::IncompleteMetadata { missing: "bitrate", .. })
        ));
    }

    #[test]
    fn test_text_is_escaped() {
        let format = lookup(140).unwrap();
        let xml = write_manifest(&format, 1000, |w| text_element(w, "BaseURL", "https://h/p?a=1&b=2"))
            .unwrap();
        assert!(xml.contains("<BaseURL>https://h/p?a=1&amp;b=2</BaseURL>"));
    }
}
