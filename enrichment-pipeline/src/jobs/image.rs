use std::path::Path;

use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::types::{
        background_task::{BackgroundTask, TaskPayload},
        document::AnalysisStatus,
        image::Image,
        note::{Note, NoteOrigin},
        tag::Tag,
    },
    utils::wikilink::extract_hashtags,
};

use crate::EnrichmentPipeline;

const IMAGE_ANALYSIS_PROMPT: &str = "Describe this image for a personal knowledge base. Cover \
what it shows, any visible text, and why someone might have saved it. \
Finish with a line 'Tags: tag1, tag2, tag3' holding up to five short \
lowercase tags.";

const MAX_TAGS: usize = 5;

/// Vision analysis with a two-phase commit: phase 1 persists the
/// analysis result unconditionally; phase 2 runs best-effort enrichment
/// (tags, linked summary note, display name) where no sub-step failure
/// can disturb phase 1 or the other sub-steps.
#[instrument(skip(pipeline), fields(image_id))]
pub async fn analyze(pipeline: &EnrichmentPipeline, image_id: &str) -> Result<(), AppError> {
    let image: Image = pipeline
        .db
        .get_item(image_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Image {image_id} not found")))?;

    Image::set_status(image_id, AnalysisStatus::Processing, &pipeline.db).await?;

    let analysis = match pipeline
        .vision
        .analyze_file(Path::new(&image.filepath), IMAGE_ANALYSIS_PROMPT)
        .await
    {
        Ok(analysis) => analysis,
        Err(err) => {
            if err.category() == common::error::ErrorCategory::Permanent {
                Image::set_status(image_id, AnalysisStatus::Failed, &pipeline.db).await?;
            }
            return Err(err);
        }
    };

    // Phase 1: the analysis result is committed before any enrichment
    let embedding = match pipeline.embedder.embed(&analysis).await {
        Ok(embedding) => Some(embedding),
        Err(err) => {
            warn!(error = %err, "Analysis embedding skipped");
            None
        }
    };
    Image::save_analysis(image_id, &analysis, embedding, &pipeline.db).await?;

    // Phase 2: each enrichment sub-step is isolated
    let tags = extract_tags(&analysis);

    let mut tag_ids: Vec<String> = Vec::new();
    for tag_name in &tags {
        match Tag::get_or_create(&image.user_id, tag_name, &pipeline.db).await {
            Ok(tag) => tag_ids.push(tag.id),
            Err(err) => warn!(tag = %tag_name, error = %err, "Tag creation skipped"),
        }
    }
    if !tag_ids.is_empty() {
        if let Err(err) = pipeline
            .db
            .client
            .query("UPDATE type::thing('image', $id) SET tag_ids = $tags")
            .bind(("id", image_id.to_owned()))
            .bind(("tags", tag_ids.clone()))
            .await
        {
            warn!(error = %err, "Attaching tags to image failed");
        }
    }

    let note_title = derive_note_title(&analysis, &image.filename);
    if let Err(err) = create_linked_note(pipeline, &image, &note_title, &analysis, &tag_ids).await {
        warn!(error = %err, "Linked summary note creation failed");
    }

    if let Err(err) = pipeline
        .db
        .client
        .query("UPDATE type::thing('image', $id) SET display_name = $name")
        .bind(("id", image_id.to_owned()))
        .bind(("name", note_title.clone()))
        .await
    {
        warn!(error = %err, "Setting display name failed");
    }

    info!(image_id, tags = tags.len(), "Image analysis complete");
    Ok(())
}

/// Tags from the trailing `Tags:` line, with inline hashtags as backup.
fn extract_tags(analysis: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    for line in analysis.lines().rev() {
        let trimmed = line.trim();
        if let Some(listing) = trimmed
            .strip_prefix("Tags:")
            .or_else(|| trimmed.strip_prefix("tags:"))
        {
            for tag in listing.split(',') {
                let cleaned = tag.trim().trim_start_matches('#').to_lowercase();
                if !cleaned.is_empty() && !tags.contains(&cleaned) {
                    tags.push(cleaned);
                }
            }
            break;
        }
    }

    if tags.is_empty() {
        let mut hashtags: Vec<String> = extract_hashtags(analysis).into_iter().collect();
        hashtags.sort();
        tags = hashtags;
    }

    tags.truncate(MAX_TAGS);
    tags
}

fn derive_note_title(analysis: &str, filename: &str) -> String {
    let first_line = analysis
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.to_lowercase().starts_with("tags:"))
        .unwrap_or(filename);

    let mut title: String = first_line
        .trim_start_matches('#')
        .trim()
        .chars()
        .take(80)
        .collect();
    if title.is_empty() {
        title = filename.to_owned();
    }
    title
}

async fn create_linked_note(
    pipeline: &EnrichmentPipeline,
    image: &Image,
    title: &str,
    analysis: &str,
    tag_ids: &[String],
) -> Result<(), AppError> {
    let mut note = Note::new(
        image.user_id.clone(),
        title.to_owned(),
        analysis.to_owned(),
        NoteOrigin::ImageAnalysis,
    );
    note.artifact_id = Some(image.id.clone());
    note.tag_ids = tag_ids.to_vec();
    note.slug = Note::unique_slug(&image.user_id, title, &pipeline.db).await?;

    let note_id = note.id.clone();
    pipeline.db.store_item(note).await?;

    BackgroundTask::enqueue(
        TaskPayload::NoteEmbed { note_id },
        &image.user_id,
        &pipeline.db,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tags_from_trailing_line() {
        let analysis = "A whiteboard diagram of a network.\n\nTags: networking, #diagram, Whiteboard";
        assert_eq!(
            extract_tags(analysis),
            vec!["networking", "diagram", "whiteboard"]
        );
    }

    #[test]
    fn test_extract_tags_falls_back_to_hashtags() {
        let analysis = "Photo of a #garden with #tomato plants.";
        assert_eq!(extract_tags(analysis), vec!["garden", "tomato"]);
    }

    #[test]
    fn test_extract_tags_caps_at_five() {
        let analysis = "Tags: one, two, three, four, five, six, seven";
        assert_eq!(extract_tags(analysis).len(), 5);
    }

    #[test]
    fn test_note_title_from_first_meaningful_line() {
        let analysis = "\n# A sunset over the harbor\nLong description follows.\nTags: sunset";
        assert_eq!(
            derive_note_title(analysis, "img_001.jpg"),
            "A sunset over the harbor"
        );
        assert_eq!(derive_note_title("", "img_001.jpg"), "img_001.jpg");
    }
}
