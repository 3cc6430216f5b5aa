//! Civitai sampler names to ComfyUI `sampler_name` / `scheduler`.
//!
//! Civitai folds the scheduler into the sampler string ("DPM++ 2M Karras");
//! ComfyUI keeps them separate.

use tracing::warn;

const SAMPLERS: &[(&str, &str)] = &[
    ("Euler", "euler"),
    ("Euler a", "euler_ancestral"),
    ("Heun", "heun"),
    ("Heun++", "heunpp2"),
    ("DPM2", "dpm_2"),
    ("DPM2 a", "dpm_2_ancestral"),
    ("LMS", "lms"),
    ("DPM fast", "dpm_fast"),
    ("DPM adaptive", "dpm_adaptive"),
    ("DPM++ SDE", "dpmpp_sde"),
    ("DPM++ 2S a", "dpmpp_2s_ancestral"),
    ("DPM++ 2M", "dpmpp_2m"),
    ("DPM++ 2M SDE", "dpmpp_2m_sde"),
    ("DPM++ 3M SDE", "dpmpp_3m_sde"),
    ("DDIM", "ddim"),
    // ComfyUI has no PLMS.
    ("PLMS", "euler"),
    ("UniPC", "uni_pc"),
    ("LCM", "lcm"),
    ("DDPM", "ddpm"),
];

const SCHEDULER_SUFFIXES: &[(&str, &str)] = &[("Karras", "karras"), ("Exponential", "exponential")];

const SCHEDULE_TYPES: &[(&str, &str)] = &[
    ("Karras", "karras"),
    ("Exponential", "exponential"),
    ("Automatic", "normal"),
    ("Uniform", "sgm_uniform"),
    ("Normal", "normal"),
    ("Simple", "simple"),
    ("SGM Uniform", "sgm_uniform"),
    ("Beta", "beta"),
];

pub const DEFAULT_SAMPLER: &str = "euler";
pub const DEFAULT_SCHEDULER: &str = "normal";

/// Map a Civitai sampler string and optional "Schedule type" to
/// `(sampler_name, scheduler)`.
pub fn map_sampler(sampler: &str, schedule_type: Option<&str>) -> (&'static str, &'static str) {
    let trimmed = sampler.trim();
    if trimmed.is_empty() {
        return (DEFAULT_SAMPLER, DEFAULT_SCHEDULER);
    }

    let mut name = trimmed;
    let mut scheduler = DEFAULT_SCHEDULER;
    for (suffix, mapped) in SCHEDULER_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if stripped.ends_with(' ') {
                name = stripped.trim_end();
                scheduler = *mapped;
                break;
            }
        }
    }

    let sampler_name = SAMPLERS
        .iter()
        .find(|(k, _)| *k == name)
        .or_else(|| SAMPLERS.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)))
        .map(|(_, v)| *v)
        .unwrap_or_else(|| {
            warn!("Unknown sampler '{}', falling back to '{}'", sampler, DEFAULT_SAMPLER);
            DEFAULT_SAMPLER
        });

    if let Some(explicit) = schedule_type
        .map(str::trim)
        .and_then(|t| SCHEDULE_TYPES.iter().find(|(k, _)| *k == t))
    {
        scheduler = explicit.1;
    }

    (sampler_name, scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_becomes_scheduler() {
        assert_eq!(map_sampler("DPM++ 2M Karras", None), ("dpmpp_2m", "karras"));
        assert_eq!(map_sampler("DPM++ SDE Exponential", None), ("dpmpp_sde", "exponential"));
    }

    #[test]
    fn test_case_insensitive_and_fallback() {
        assert_eq!(map_sampler("euler A", None), ("euler_ancestral", "normal"));
        assert_eq!(map_sampler("Restart", None), ("euler", "normal"));
        assert_eq!(map_sampler("", Some("Karras")), ("euler", "normal"));
    }

    #[test]
    fn test_schedule_type_overrides_suffix() {
        assert_eq!(map_sampler("DPM++ 2M Karras", Some("Simple")), ("dpmpp_2m", "simple"));
        assert_eq!(map_sampler("Euler a", Some("Unheard")), ("euler_ancestral", "normal"));
    }
}
