//! Line-oriented SDP editing.
//!
//! The document is split into a session header and media sections; each edit touches only the
//! lines it has to and re-serializes everything else verbatim. Every operation returns the input
//! unchanged when the target codec or section is missing.

/// Codec selector used by [`preserve_codec`].
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSelector {
    /// `video/VP9`, `audio/opus`, ...
    pub mime_type: String,
    pub clock_rate: u32,
    pub sdp_fmtp_line: Option<String>,
}

impl CodecSelector {
    fn name(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.mime_type)
    }
}

#[derive(Debug, Clone)]
struct Rtpmap {
    payload: String,
    codec: String,
    clock_rate: u32,
}

#[derive(Debug, Clone)]
struct MediaSection {
    lines: Vec<String>,
}

impl MediaSection {
    fn media_line(&self) -> &str {
        &self.lines[0]
    }

    fn kind(&self) -> &str {
        self.media_line()
            .strip_prefix("m=")
            .and_then(|rest| rest.split(' ').next())
            .unwrap_or("")
    }

    fn payloads(&self) -> Vec<String> {
        self.media_line()
            .split(' ')
            .skip(3)
            .map(str::to_string)
            .collect()
    }

    fn set_payloads(&mut self, payloads: &[String]) {
        let head: Vec<&str> = self.lines[0].split(' ').take(3).collect();
        let mut line = head.join(" ");
        for payload in payloads {
            line.push(' ');
            line.push_str(payload);
        }
        self.lines[0] = line;
    }

    fn mid(&self) -> Option<&str> {
        self.lines.iter().find_map(|l| l.strip_prefix("a=mid:"))
    }

    fn rtpmaps(&self) -> Vec<Rtpmap> {
        self.lines
            .iter()
            .filter_map(|line| {
                let rest = line.strip_prefix("a=rtpmap:")?;
                let (payload, encoding) = rest.split_once(' ')?;
                let mut parts = encoding.split('/');
                let codec = parts.next()?.to_string();
                let clock_rate = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
                Some(Rtpmap {
                    payload: payload.to_string(),
                    codec,
                    clock_rate,
                })
            })
            .collect()
    }

    fn payloads_for(&self, codec: &str) -> Vec<String> {
        self.rtpmaps()
            .into_iter()
            .filter(|map| map.codec.eq_ignore_ascii_case(codec))
            .map(|map| map.payload)
            .collect()
    }

    fn fmtp_index(&self, payload: &str) -> Option<usize> {
        let prefix = format!("a=fmtp:{payload} ");
        self.lines.iter().position(|l| l.starts_with(&prefix))
    }

    fn fmtp(&self, payload: &str) -> Option<&str> {
        let index = self.fmtp_index(payload)?;
        self.lines[index].split_once(' ').map(|(_, config)| config)
    }

    /// Drops payloads from the `m=` line together with their rtpmap/fmtp/rtcp-fb lines.
    /// Reorders the media line so `codec` payloads come first. False when the codec is absent.
    fn move_to_front(&mut self, codec: &str) -> bool {
        let preferred = self.payloads_for(codec);
        if preferred.is_empty() {
            return false;
        }
        let (mut front, rest): (Vec<String>, Vec<String>) = self
            .payloads()
            .into_iter()
            .partition(|p| preferred.contains(p));
        front.extend(rest);
        self.set_payloads(&front);
        true
    }

    fn remove_payloads(&mut self, doomed: &[String]) {
        let kept: Vec<String> = self
            .payloads()
            .into_iter()
            .filter(|p| !doomed.contains(p))
            .collect();
        self.set_payloads(&kept);

        self.lines.retain(|line| {
            !doomed.iter().any(|payload| {
                ["a=rtpmap:", "a=fmtp:", "a=rtcp-fb:"]
                    .iter()
                    .any(|attr| line.starts_with(&format!("{attr}{payload} ")))
            })
        });
    }
}

#[derive(Debug, Clone)]
struct SdpDocument {
    header: Vec<String>,
    media: Vec<MediaSection>,
    eol: &'static str,
    trailing_eol: bool,
}

impl SdpDocument {
    fn parse(sdp: &str) -> Self {
        let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_eol = sdp.ends_with(eol);
        let body = sdp.strip_suffix(eol).unwrap_or(sdp);

        let mut header = Vec::new();
        let mut media: Vec<MediaSection> = Vec::new();
        for line in body.split(eol) {
            if line.starts_with("m=") {
                media.push(MediaSection {
                    lines: vec![line.to_string()],
                });
            } else if let Some(section) = media.last_mut() {
                section.lines.push(line.to_string());
            } else {
                header.push(line.to_string());
            }
        }

        Self {
            header,
            media,
            eol,
            trailing_eol,
        }
    }

    fn section_by_mid(&mut self, mid: &str) -> Option<&mut MediaSection> {
        self.media.iter_mut().find(|m| m.mid() == Some(mid))
    }

    fn render(&self) -> String {
        let mut lines: Vec<&str> = self.header.iter().map(String::as_str).collect();
        for section in &self.media {
            lines.extend(section.lines.iter().map(String::as_str));
        }
        let mut out = lines.join(self.eol);
        if self.trailing_eol {
            out.push_str(self.eol);
        }
        out
    }
}

/// Replaces `key=value` inside an fmtp config, appending the pair when the key is absent.
fn set_fmtp_param(config: &str, key: &str, value: &str) -> String {
    let mut found = false;
    let mut params: Vec<String> = config
        .split(';')
        .filter(|p| !p.is_empty())
        .map(|param| match param.split_once('=') {
            Some((k, _)) if k.trim() == key => {
                found = true;
                format!("{k}={value}")
            }
            _ => param.to_string(),
        })
        .collect();
    if !found {
        params.push(format!("{key}={value}"));
    }
    params.join(";")
}

fn fmtp_param<'a>(config: &'a str, key: &str) -> Option<&'a str> {
    config.split(';').find_map(|param| {
        let (k, v) = param.split_once('=')?;
        (k.trim() == key).then_some(v.trim())
    })
}

fn rewrite_fmtp(section: &mut MediaSection, payload: &str, edit: impl Fn(&str) -> String) -> bool {
    let Some(index) = section.fmtp_index(payload) else {
        return false;
    };
    let Some((prefix, config)) = section.lines[index].split_once(' ') else {
        return false;
    };
    let updated = format!("{prefix} {}", edit(config));
    if updated == section.lines[index] {
        return false;
    }
    section.lines[index] = updated;
    true
}

/// Moves every payload of `codec` to the front of the `m=` line of `media_type` sections.
pub fn set_preferred_codec(sdp: &str, media_type: &str, codec: &str) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let mut changed = false;
    for section in doc.media.iter_mut().filter(|m| m.kind() == media_type) {
        changed |= section.move_to_front(codec);
    }
    if changed { doc.render() } else { sdp.to_string() }
}

/// Moves `codec` to the front of the section identified by `mid`.
pub fn prefer_codec(sdp: &str, mid: &str, codec: &str) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let Some(section) = doc.section_by_mid(mid) else {
        return sdp.to_string();
    };
    if section.move_to_front(codec) { doc.render() } else { sdp.to_string() }
}

/// Removes `codec` from every `media_type` section.
pub fn remove_codec(sdp: &str, media_type: &str, codec: &str) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let mut changed = false;
    for section in doc.media.iter_mut().filter(|m| m.kind() == media_type) {
        let doomed = section.payloads_for(codec);
        if doomed.is_empty() {
            continue;
        }
        section.remove_payloads(&doomed);
        changed = true;
    }
    if changed { doc.render() } else { sdp.to_string() }
}

/// Sets Opus `usedtx` to `1`/`0`, adding the parameter when absent.
pub fn toggle_dtx(sdp: &str, enable: bool) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let value = if enable { "1" } else { "0" };
    let mut changed = false;
    for section in doc.media.iter_mut().filter(|m| m.kind() == "audio") {
        for payload in section.payloads_for("opus") {
            changed |= rewrite_fmtp(section, &payload, |config| {
                set_fmtp_param(config, "usedtx", value)
            });
        }
    }
    if changed { doc.render() } else { sdp.to_string() }
}

/// Raises Opus quality (stereo, 510 kbps average) on the section identified by `mid`.
pub fn enable_high_quality_audio(sdp: &str, mid: &str) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let Some(section) = doc.section_by_mid(mid) else {
        return sdp.to_string();
    };
    let mut changed = false;
    for payload in section.payloads_for("opus") {
        changed |= rewrite_fmtp(section, &payload, |config| {
            let config = set_fmtp_param(config, "stereo", "1");
            set_fmtp_param(&config, "maxaveragebitrate", "510000")
        });
    }
    if changed { doc.render() } else { sdp.to_string() }
}

/// Keeps only the selected codec (and its rtx companion) in the section identified by `mid`.
pub fn preserve_codec(sdp: &str, mid: &str, codec: &CodecSelector) -> String {
    let mut doc = SdpDocument::parse(sdp);
    let Some(section) = doc.section_by_mid(mid) else {
        return sdp.to_string();
    };

    let candidates: Vec<Rtpmap> = section
        .rtpmaps()
        .into_iter()
        .filter(|map| {
            map.codec.eq_ignore_ascii_case(codec.name())
                && (codec.clock_rate == 0 || map.clock_rate == codec.clock_rate)
        })
        .collect();
    let exact = codec.sdp_fmtp_line.as_deref().and_then(|wanted| {
        candidates
            .iter()
            .find(|map| section.fmtp(&map.payload).unwrap_or("") == wanted)
    });
    let Some(chosen) = exact.or(candidates.first()).map(|m| m.payload.clone()) else {
        return sdp.to_string();
    };

    let rtx: Vec<String> = section
        .payloads_for("rtx")
        .into_iter()
        .filter(|p| {
            section
                .fmtp(p)
                .and_then(|config| fmtp_param(config, "apt"))
                .is_some_and(|apt| apt == chosen)
        })
        .collect();

    let doomed: Vec<String> = section
        .payloads()
        .into_iter()
        .filter(|p| *p != chosen && !rtx.contains(p))
        .collect();
    if doomed.is_empty() {
        return sdp.to_string();
    }
    section.remove_payloads(&doomed);
    doc.render()
}

/// Mirrors `stereo=1` from the offered Opus parameters into the answer, per mid.
pub fn enable_stereo(offer: &str, answer: &str) -> String {
    let offer_doc = SdpDocument::parse(offer);
    let stereo_mids: Vec<String> = offer_doc
        .media
        .iter()
        .filter(|m| m.kind() == "audio")
        .filter(|m| {
            m.payloads_for("opus").iter().any(|payload| {
                m.fmtp(payload)
                    .and_then(|config| fmtp_param(config, "stereo"))
                    .is_some_and(|v| v == "1")
            })
        })
        .filter_map(|m| m.mid().map(str::to_string))
        .collect();
    if stereo_mids.is_empty() {
        return answer.to_string();
    }

    let mut doc = SdpDocument::parse(answer);
    let mut changed = false;
    for mid in &stereo_mids {
        let Some(section) = doc.section_by_mid(mid) else {
            continue;
        };
        for payload in section.payloads_for("opus") {
            changed |= rewrite_fmtp(section, &payload, |config| {
                set_fmtp_param(config, "stereo", "1")
            });
        }
    }
    if changed { doc.render() } else { answer.to_string() }
}

/// Finds the mid of the first `kind` section announcing `track_id` (or without any msid).
pub fn mid_for_track(sdp: &str, kind: &str, track_id: &str) -> Option<String> {
    let doc = SdpDocument::parse(sdp);
    doc.media
        .iter()
        .filter(|m| m.kind() == kind)
        .find(|m| {
            let msid: Vec<&String> = m.lines.iter().filter(|l| l.starts_with("a=msid:")).collect();
            msid.is_empty() || msid.iter().any(|l| l.contains(track_id))
        })
        .and_then(|m| m.mid().map(str::to_string))
}

/// Payload order of the first `media_type` section, mostly useful for inspection.
pub fn codec_order(sdp: &str, media_type: &str) -> Vec<String> {
    SdpDocument::parse(sdp)
        .media
        .iter()
        .find(|m| m.kind() == media_type)
        .map(|m| {
            let maps = m.rtpmaps();
            m.payloads()
                .iter()
                .filter_map(|p| maps.iter().find(|map| &map.payload == p))
                .map(|map| map.codec.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}
