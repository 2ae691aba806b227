//! Scene listing and recall.

use tabled::Tabled;

use huesync_core::{BridgeConfig, Command as CoreCommand, Scene};

use crate::cli::{GlobalOpts, SceneArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct SceneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Dynamic")]
    dynamic: String,
}

impl From<&Scene> for SceneRow {
    fn from(s: &Scene) -> Self {
        Self {
            id: s.external_id.clone(),
            name: s.name.clone(),
            state: format!("{:?}", s.state),
            scope: if s.scope_type.is_empty() {
                "-".into()
            } else {
                format!("{} {}", s.scope_type, s.scope_id)
            },
            dynamic: if s.supports_dynamic_recall { "yes" } else { "no" }.into(),
        }
    }
}

pub async fn list(config: BridgeConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let scenes: Vec<Scene> = util::with_synced(config, |controller| async move {
        Ok(controller
            .scenes_snapshot()
            .iter()
            .map(|s| (**s).clone())
            .collect())
    })
    .await?;

    let rendered = output::render_list(&global.output, &scenes, |s| SceneRow::from(s), |s| {
        s.external_id.clone()
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

pub async fn recall(
    config: BridgeConfig,
    args: SceneArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let action = args.action.clone();

    let scene_name = util::with_synced(config, |controller| async move {
        let scene = util::resolve_scene(&controller, &args.scene)?;
        controller
            .execute(CoreCommand::SceneInvoke {
                scene_id: scene.external_id.clone(),
                group_id: args.group,
                action: args.action,
            })
            .await?;
        Ok(scene.name.clone())
    })
    .await?;

    let color = output::should_color(&global.color);
    output::print_output(
        &output::success(&format!("scene \"{scene_name}\": {action}"), color),
        global.quiet,
    );
    Ok(())
}
